use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the article database façade.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file could not be opened (missing, unreadable, not SQLite)
    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    /// A read query failed, typically because a table or column is missing
    #[error("Query failed ({context}): {source}")]
    Query {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// The staged file attached but cannot be imported
    #[error("Staged database '{path}' is unusable: {reason}")]
    Staged { path: String, reason: String },

    /// An all-or-nothing merge was rolled back
    #[error("Merge of table '{table}' failed, import rolled back: {reason}")]
    Merge { table: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    pub(crate) fn query(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| DatabaseError::Query { context, source }
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for article queries (used by sqlx FromRow).
///
/// Every column except `id` and `title` is nullable in databases produced by
/// older scraper versions, hence the `Option`s.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub title: String,
    pub category: Option<String>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub detail_url: Option<String>,
    pub date: Option<String>,
    pub tags: Option<String>,
    pub created_at: Option<String>,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            title: self.title,
            category: self.category.unwrap_or_default(),
            thumbnail: self.thumbnail.filter(|t| !t.is_empty()),
            description: self.description.filter(|d| !d.is_empty()),
            detail_url: self.detail_url.filter(|u| !u.is_empty()),
            date: self.date.filter(|d| !d.is_empty()),
            tags: parse_tags(self.tags.as_deref()),
            created_at: self.created_at,
        }
    }
}

/// Tags are stored as a JSON array; anything else is treated as "no tags".
fn parse_tags(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring malformed tags column");
            Vec::new()
        }),
        _ => Vec::new(),
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Article as shown in list views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    /// Empty string when the scraper recorded no category
    pub category: String,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub detail_url: Option<String>,
    pub date: Option<String>,
    pub tags: Vec<String>,
    pub created_at: Option<String>,
}

/// Article plus its image URLs in display order (`img_order` ascending).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleDetail {
    pub article: Article,
    pub images: Vec<String>,
}

/// Number of articles in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

/// One row of the scraper's `scrape_log` table.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ScrapeLogEntry {
    pub scrape_date: Option<String>,
    pub category: Option<String>,
    pub articles_count: Option<i64>,
}

/// Summary of a database's contents.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub tables: Vec<String>,
    pub article_count: i64,
    pub image_count: i64,
    pub categories: Vec<CategoryCount>,
    pub latest: Vec<Article>,
    /// `None` when the database has no `scrape_log` table
    pub scrape_log: Option<Vec<ScrapeLogEntry>>,
}

// ============================================================================
// Merge Types
// ============================================================================

/// How `import_staged` reacts to a table that fails to copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Log the failure, keep the tables that did copy, continue with the rest
    #[default]
    BestEffort,
    /// Roll back every table on the first failure
    AllOrNothing,
}

/// Outcome for a single table of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMerge {
    pub name: String,
    /// Whether the table was created in the live database by this merge
    pub created: bool,
    /// Rows written (inserted or replaced)
    pub rows: u64,
    /// Failure message; the table was left untouched when set
    pub error: Option<String>,
}

/// Per-table results of `import_staged`, in table-name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub tables: Vec<TableMerge>,
    /// Staged indexes recreated in the live database
    pub indexes: Vec<String>,
}

impl MergeReport {
    /// Tables copied successfully.
    pub fn merged(&self) -> impl Iterator<Item = &TableMerge> {
        self.tables.iter().filter(|t| t.error.is_none())
    }

    /// Tables that failed and were skipped.
    pub fn failed(&self) -> impl Iterator<Item = &TableMerge> {
        self.tables.iter().filter(|t| t.error.is_some())
    }

    pub fn is_complete(&self) -> bool {
        self.tables.iter().all(|t| t.error.is_none())
    }

    pub fn total_rows(&self) -> u64 {
        self.merged().map(|t| t.rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags_json_array() {
        assert_eq!(
            parse_tags(Some(r#"["portrait", "street"]"#)),
            vec!["portrait".to_string(), "street".to_string()]
        );
    }

    #[test]
    fn test_parse_tags_tolerates_garbage() {
        assert!(parse_tags(Some("not json")).is_empty());
        assert!(parse_tags(Some("")).is_empty());
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn test_merge_report_helpers() {
        let report = MergeReport {
            tables: vec![
                TableMerge {
                    name: "articles".into(),
                    created: false,
                    rows: 0,
                    error: Some("table articles has 2 columns".into()),
                },
                TableMerge {
                    name: "images".into(),
                    created: true,
                    rows: 7,
                    error: None,
                },
            ],
            indexes: Vec::new(),
        };
        assert!(!report.is_complete());
        assert_eq!(report.merged().count(), 1);
        assert_eq!(report.failed().next().map(|t| t.name.as_str()), Some("articles"));
        assert_eq!(report.total_rows(), 7);
    }

    #[test]
    fn test_merge_mode_deserializes_snake_case() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            mode: MergeMode,
        }
        let w: Wrapper = toml::from_str("mode = \"all_or_nothing\"").unwrap();
        assert_eq!(w.mode, MergeMode::AllOrNothing);
    }
}
