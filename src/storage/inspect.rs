use super::schema::Database;
use super::types::{Article, DatabaseError, Inspection, ScrapeLogEntry};

impl Database {
    /// Summarise the database: tables, counts, categories, newest articles and
    /// recent scrape history.
    ///
    /// Used to sanity-check a freshly downloaded library. The `scrape_log`
    /// table is optional; everything else must be present.
    pub async fn inspect(&self) -> Result<Inspection, DatabaseError> {
        let tables = self.list_tables().await?;

        let (article_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::query("count articles"))?;

        let (image_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::query("count images"))?;

        let categories = self.get_categories().await?;
        let latest: Vec<Article> = self.get_articles(None, 5, 0).await?;

        let scrape_log = if tables.iter().any(|t| t == "scrape_log") {
            Some(self.recent_scrapes(5).await?)
        } else {
            None
        };

        Ok(Inspection {
            tables,
            article_count,
            image_count,
            categories,
            latest,
            scrape_log,
        })
    }

    async fn recent_scrapes(&self, limit: i64) -> Result<Vec<ScrapeLogEntry>, DatabaseError> {
        sqlx::query_as::<_, ScrapeLogEntry>(
            r#"
            SELECT CAST(scrape_date AS TEXT) AS scrape_date, category, articles_count
            FROM scrape_log
            ORDER BY id DESC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("read scrape log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::seed_library;

    #[tokio::test]
    async fn test_inspect_full_library() {
        let db = seed_library().await;
        let report = db.inspect().await.unwrap();

        assert_eq!(report.tables, vec!["articles", "images", "scrape_log"]);
        assert_eq!(report.article_count, 5);
        assert_eq!(report.image_count, 5);
        assert_eq!(report.categories.len(), 3);
        assert_eq!(report.latest.first().map(|a| a.id), Some(5));

        let log = report.scrape_log.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].scrape_date.as_deref(), Some("2024-05-02"));
        assert_eq!(log[0].articles_count, Some(2));
    }

    #[tokio::test]
    async fn test_inspect_without_scrape_log() {
        let db = seed_library().await;
        sqlx::query("DROP TABLE scrape_log")
            .execute(&db.pool)
            .await
            .unwrap();

        let report = db.inspect().await.unwrap();
        assert!(report.scrape_log.is_none());
    }

    #[tokio::test]
    async fn test_inspect_requires_articles() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(matches!(
            db.inspect().await,
            Err(DatabaseError::Query { .. })
        ));
    }
}
