//! Local article database.
//!
//! [`Database`] is the read façade over the photo library (categories, pages,
//! detail, search) plus the attach-and-copy import used to fold a freshly
//! downloaded database into the live one.

mod articles;
mod inspect;
mod merge;
mod schema;
#[cfg(test)]
pub(crate) mod test_support;
mod types;

pub use articles::DEFAULT_PAGE_SIZE;
pub use merge::SQLITE_HEADER;
pub use schema::Database;
pub use types::{
    Article, ArticleDetail, CategoryCount, DatabaseError, Inspection, MergeMode, MergeReport,
    ScrapeLogEntry, TableMerge,
};
