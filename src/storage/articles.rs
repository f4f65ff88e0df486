use super::schema::Database;
use super::types::{Article, ArticleDbRow, ArticleDetail, CategoryCount, DatabaseError};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Page size used when the caller does not pass one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Maximum number of articles returned by a single list query
const MAX_PAGE_SIZE: i64 = 500;

/// Maximum number of search hits
const MAX_SEARCH_RESULTS: i64 = 50;

const ARTICLE_COLUMNS: &str = "id, title, category, thumbnail, description, detail_url, date, \
                               tags, CAST(created_at AS TEXT) AS created_at";

impl Database {
    // ========================================================================
    // Listing
    // ========================================================================

    /// Article counts per category, in category order.
    ///
    /// Articles without a category are grouped under the empty string.
    pub async fn get_categories(&self) -> Result<Vec<CategoryCount>, DatabaseError> {
        sqlx::query_as::<_, CategoryCount>(
            r#"
            SELECT COALESCE(category, '') AS category, COUNT(*) AS count
            FROM articles
            GROUP BY COALESCE(category, '')
            ORDER BY category
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("list categories"))
    }

    /// One page of articles, newest first.
    ///
    /// An empty or `None` category lists every article. `limit` is clamped to
    /// `1..=500`; negative offsets are treated as zero.
    pub async fn get_articles(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        let category = category.filter(|c| !c.is_empty());

        let rows = match category {
            Some(category) => {
                sqlx::query_as::<_, ArticleDbRow>(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE category = ? \
                     ORDER BY id DESC LIMIT ? OFFSET ?"
                ))
                .bind(category)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ArticleDbRow>(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY id DESC LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DatabaseError::query("list articles"))?;

        tracing::debug!(
            category = category.unwrap_or("*"),
            limit = limit,
            offset = offset,
            returned = rows.len(),
            "Loaded article page"
        );

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Detail
    // ========================================================================

    /// An article together with its images, or `None` if the id is unknown.
    pub async fn get_article_detail(
        &self,
        article_id: i64,
    ) -> Result<Option<ArticleDetail>, DatabaseError> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query("load article"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let images: Vec<(String,)> = sqlx::query_as(
            "SELECT image_url FROM images WHERE article_id = ? ORDER BY img_order, id",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("load article images"))?;

        Ok(Some(ArticleDetail {
            article: row.into_article(),
            images: images.into_iter().map(|(url,)| url).collect(),
        }))
    }

    // ========================================================================
    // Search & Discovery
    // ========================================================================

    /// Title substring search, newest first, at most 50 hits.
    ///
    /// LIKE wildcards in `keyword` match literally. A blank keyword returns no
    /// results rather than the whole library.
    pub async fn search_articles(&self, keyword: &str) -> Result<Vec<Article>, DatabaseError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(keyword));
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE title LIKE ? ESCAPE '\\' \
             ORDER BY id DESC LIMIT ?"
        ))
        .bind(&pattern)
        .bind(MAX_SEARCH_RESULTS)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query("search articles"))?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// A uniformly random article, or `None` when the library is empty.
    pub async fn get_random_article(&self) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY RANDOM() LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query("pick random article"))?;

        Ok(row.map(ArticleDbRow::into_article))
    }
}

/// Escape LIKE metacharacters using `\` as the escape character.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::seed_library;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_off\\"), "100\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_get_categories_groups_and_counts() {
        let db = seed_library().await;
        let categories = db.get_categories().await.unwrap();
        assert_eq!(
            categories,
            vec![
                CategoryCount {
                    category: String::new(),
                    count: 1
                },
                CategoryCount {
                    category: "landscape".into(),
                    count: 2
                },
                CategoryCount {
                    category: "portrait".into(),
                    count: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_get_articles_newest_first_with_paging() {
        let db = seed_library().await;

        let page = db.get_articles(None, 2, 0).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 4]);

        let page = db.get_articles(None, 2, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_get_articles_category_filter() {
        let db = seed_library().await;
        let page = db.get_articles(Some("portrait"), 20, 0).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1]);

        // Empty category means "all"
        let all = db.get_articles(Some(""), 20, 0).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_get_articles_clamps_bad_paging() {
        let db = seed_library().await;
        let page = db.get_articles(None, 0, -10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 5);
    }

    #[tokio::test]
    async fn test_article_detail_orders_images() {
        let db = seed_library().await;
        let detail = db.get_article_detail(1).await.unwrap().unwrap();
        assert_eq!(detail.article.title, "Morning portrait");
        assert_eq!(detail.article.tags, vec!["film".to_string()]);
        assert_eq!(
            detail.images,
            vec![
                "https://img.example.com/1-a.jpg".to_string(),
                "https://img.example.com/1-b.jpg".to_string(),
                "https://img.example.com/1-c.jpg".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_article_detail_without_images() {
        let db = seed_library().await;
        let detail = db.get_article_detail(4).await.unwrap().unwrap();
        assert!(detail.images.is_empty());
    }

    #[tokio::test]
    async fn test_article_detail_missing_id() {
        let db = seed_library().await;
        assert!(db.get_article_detail(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_matches_title_substring() {
        let db = seed_library().await;
        let hits = db.search_articles("portrait").await.unwrap();
        let ids: Vec<i64> = hits.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_search_wildcards_are_literal() {
        let db = seed_library().await;
        assert_eq!(db.search_articles("100%").await.unwrap().len(), 1);
        assert_eq!(db.search_articles("%").await.unwrap().len(), 1);
        assert!(db.search_articles("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_random_article_empty_library() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_schema().await.unwrap();
        assert!(db.get_random_article().await.unwrap().is_none());

        let db = seed_library().await;
        assert!(db.get_random_article().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_table_is_query_error() {
        let db = Database::open_in_memory().await.unwrap();
        let err = db.get_categories().await.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Query {
                context: "list categories",
                ..
            }
        ));
    }
}
