use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;

use super::types::DatabaseError;

const IN_MEMORY_FILENAME: &str = ":memory:";

// ============================================================================
// Database
// ============================================================================

/// Handle to the local article database.
///
/// Backed by a single-connection pool: `ATTACH` state is per connection, and
/// an in-memory database only lives as long as its one connection does, so
/// the connection is never reaped for idleness or age.
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open an existing database file.
    ///
    /// The file is treated as authoritative: no migrations run, and a missing
    /// file is an error rather than silently creating an empty library.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .foreign_keys(false)
            .pragma("busy_timeout", "5000");

        let pool = Self::pool_options()
            .connect_with(options)
            .await
            .map_err(|source| DatabaseError::Open {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "Opened article database");
        Ok(Self { pool })
    }

    /// Open an empty private in-memory database.
    ///
    /// Opened by the `:memory:` filename rather than the in-memory open flag:
    /// the flag is inherited by `ATTACH`, which would then attach an empty
    /// memory schema instead of the staged file.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new()
            .filename(IN_MEMORY_FILENAME)
            .create_if_missing(true)
            .foreign_keys(false);
        let pool = Self::pool_options()
            .connect_with(options)
            .await
            .map_err(|source| DatabaseError::Open {
                path: IN_MEMORY_FILENAME.to_string(),
                source,
            })?;
        Ok(Self { pool })
    }

    /// Create a new database file (or open an existing one) with the article
    /// schema in place.
    ///
    /// Rollback journaling keeps the whole database in the one file, so it can
    /// be shipped as-is once the handle is closed.
    pub async fn create(path: &Path) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(false)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = Self::pool_options()
            .connect_with(options)
            .await
            .map_err(|source| DatabaseError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let db = Self { pool };
        db.create_schema().await?;
        Ok(db)
    }

    // Foreign keys stay off on every connection: the scraper never enforced
    // them, and merges copy `images` rows whose parents may live elsewhere.
    fn pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
    }

    /// Create the article schema if it is not already present.
    ///
    /// Mirrors the layout produced by the scraper. All statements use
    /// `IF NOT EXISTS` and run in one transaction, so re-running is a no-op.
    pub async fn create_schema(&self) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                category TEXT,
                thumbnail TEXT,
                description TEXT,
                detail_url TEXT,
                date TEXT,
                tags TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER,
                image_url TEXT NOT NULL,
                img_order INTEGER,
                FOREIGN KEY (article_id) REFERENCES articles (id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scrape_date DATE,
                category TEXT,
                articles_count INTEGER,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_article ON images(article_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Names of the user tables in the main schema, sorted.
    pub async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM main.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("list tables"))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Close the underlying connection. Required before the file is replaced.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
