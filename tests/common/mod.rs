//! Fixture builders for integration tests.
//!
//! Fixtures are built with raw sqlx so they do not depend on the code under
//! test, and use rollback journaling so the file on disk is complete once the
//! pool closes.
#![allow(dead_code)]

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;

pub const ARTICLES_SCHEMA: &str = "CREATE TABLE articles (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    category TEXT,
    thumbnail TEXT,
    description TEXT,
    detail_url TEXT,
    date TEXT,
    tags TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

pub const IMAGES_SCHEMA: &str = "CREATE TABLE images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER,
    image_url TEXT NOT NULL,
    img_order INTEGER,
    FOREIGN KEY (article_id) REFERENCES articles(id)
)";

/// Create a database file at `path` by running `statements` in order and
/// return its bytes.
pub async fn build_db(path: &Path, statements: &[&str]) -> Vec<u8> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
    std::fs::read(path).unwrap()
}

/// A scraper-shaped library holding `articles` as `(id, title, category)`.
pub async fn library(path: &Path, articles: &[(i64, &str, &str)]) -> Vec<u8> {
    let inserts: Vec<String> = articles
        .iter()
        .map(|(id, title, category)| {
            format!(
                "INSERT INTO articles (id, title, category) VALUES ({id}, '{}', '{}')",
                title.replace('\'', "''"),
                category.replace('\'', "''")
            )
        })
        .collect();

    let mut statements = vec![ARTICLES_SCHEMA, IMAGES_SCHEMA];
    statements.extend(inserts.iter().map(String::as_str));
    build_db(path, &statements).await
}

/// Run a scalar query against a closed database file.
pub async fn scalar(path: &Path, sql: &str) -> i64 {
    let options = SqliteConnectOptions::new().filename(path);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let value: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await.unwrap();
    pool.close().await;
    value
}
