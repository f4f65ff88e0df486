//! Getting the article database onto this machine and keeping it current.
//!
//! - [`DataSync`]: acquisition with mirror failover, replace or merge updates,
//!   and the once-a-day version check
//! - [`StorageBackend`]: file on disk or base64 blob in the state store
//! - [`RetryPolicy`]: ordered mirrors with a per-attempt timeout
//! - [`KeyValueStore`]: persisted version, check dates and blob

mod acquire;
mod backend;
mod mirror;
mod state;
mod version;

pub use acquire::{
    Acquired, DataSync, SyncError, UpdateOutcome, UpdateStatus, UpdateStrategy,
    BLOB_FILE_NAME, STATE_FILE_NAME,
};
pub use backend::{
    validate_database_bytes, BackendKind, BlobBackend, FileBackend, StorageBackend, StorageError,
    DB_FILE_NAME, STAGED_FILE_NAME,
};
pub use mirror::{
    FetchError, MirrorFailure, MirrorHit, RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_BYTES,
};
pub(crate) use mirror::read_limited_bytes;
pub use state::{keys, DailyGate, JsonFileStore, KeyValueStore, MemoryStore, StateError};
pub use version::{needs_update, MetadataProbe, ProbeKind, VersionDescriptor};
