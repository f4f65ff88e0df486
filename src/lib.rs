//! Photo-article viewer core: the local SQLite library, its acquisition from
//! remote mirrors, and application release checks.

pub mod config;
pub mod release;
pub mod storage;
pub mod sync;
pub mod util;
