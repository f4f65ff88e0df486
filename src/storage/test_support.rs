//! Fixture builders shared by the storage and sync unit tests.

use std::path::Path;

use super::Database;

/// Insert the five-article library used across tests.
///
/// | id | title            | category  | images |
/// |----|------------------|-----------|--------|
/// | 1  | Morning portrait | portrait  | 3      |
/// | 2  | Mountain lake    | landscape | 1      |
/// | 3  | Studio portrait  | portrait  | 1      |
/// | 4  | Desert dunes     | landscape | 0      |
/// | 5  | 100% crop        | NULL      | 0      |
pub(crate) async fn populate(db: &Database) {
    db.create_schema().await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO articles (id, title, category, description, tags) VALUES
            (1, 'Morning portrait', 'portrait', 'Soft window light', '["film"]'),
            (2, 'Mountain lake', 'landscape', 'Still water', '[]'),
            (3, 'Studio portrait', 'portrait', NULL, NULL),
            (4, 'Desert dunes', 'landscape', '', 'not-json'),
            (5, '100% crop', NULL, NULL, NULL)
    "#,
    )
    .execute(&db.pool)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO images (article_id, image_url, img_order) VALUES
            (1, 'https://img.example.com/1-c.jpg', 2),
            (1, 'https://img.example.com/1-a.jpg', 0),
            (2, 'https://img.example.com/2-a.jpg', 0),
            (1, 'https://img.example.com/1-b.jpg', 1),
            (3, 'https://img.example.com/3-a.jpg', 0)
    "#,
    )
    .execute(&db.pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO scrape_log (scrape_date, category, articles_count) VALUES \
         ('2024-05-01', 'portrait', 2), ('2024-05-02', 'landscape', 2)",
    )
    .execute(&db.pool)
    .await
    .unwrap();
}

/// In-memory database holding the standard library.
pub(crate) async fn seed_library() -> Database {
    let db = Database::open_in_memory().await.unwrap();
    populate(&db).await;
    db
}

/// Write the standard library to `path` and return the file's bytes.
pub(crate) async fn library_file(path: &Path) -> Vec<u8> {
    let db = Database::create(path).await.unwrap();
    populate(&db).await;
    db.close().await;
    std::fs::read(path).unwrap()
}
