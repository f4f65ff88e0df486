//! Where the local database lives: a plain file, or a base64 blob in the
//! key/value store.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::state::{keys, KeyValueStore, StateError};
use crate::storage::{Database, DatabaseError, MergeMode, SQLITE_HEADER};
use crate::util::atomic_write;

/// File name of the live database inside the data directory
pub const DB_FILE_NAME: &str = "photo.db";
/// File name an update is downloaded to before being merged
pub const STAGED_FILE_NAME: &str = "photo.db.staged";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored database is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Not a SQLite database: {0}")]
    InvalidDatabase(String),

    #[error("No local database stored")]
    Missing,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("The {0} backend cannot stage updates")]
    StagingUnsupported(BackendKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Database file in the data directory
    #[default]
    File,
    /// Base64 blob in the state store, opened in memory
    Blob,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::File => f.write_str("file"),
            BackendKind::Blob => f.write_str("blob"),
        }
    }
}

/// Reject payloads that cannot be a SQLite database.
///
/// Checks the 16-byte magic header and the minimum size of a database
/// header page.
pub fn validate_database_bytes(bytes: &[u8]) -> Result<(), StorageError> {
    if bytes.len() < 100 {
        return Err(StorageError::InvalidDatabase(format!(
            "payload is only {} bytes",
            bytes.len()
        )));
    }
    if !bytes.starts_with(SQLITE_HEADER) {
        return Err(StorageError::InvalidDatabase(
            "missing SQLite header".to_string(),
        ));
    }
    Ok(())
}

/// Persistence of the local database copy.
///
/// One implementation is chosen at startup; the acquisition workflow only
/// talks to this trait.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether a local copy is present.
    async fn exists(&self) -> Result<bool, StorageError>;

    /// Replace the local copy with `bytes`.
    async fn write_blob(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Open the local copy.
    async fn open(&self) -> Result<Database, StorageError>;

    /// Delete the local copy. Removing nothing is not an error.
    async fn remove(&self) -> Result<(), StorageError>;

    /// Write `bytes` next to the live copy for a later merge and return the
    /// staged path.
    async fn stage(&self, bytes: &[u8]) -> Result<PathBuf, StorageError>;
}

// ============================================================================
// File backend
// ============================================================================

pub struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn staged_path(&self) -> PathBuf {
        self.data_dir.join(STAGED_FILE_NAME)
    }

    async fn write_file(&self, dst: PathBuf, bytes: &[u8]) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || atomic_write(&dst, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn exists(&self) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path()).await?)
    }

    async fn write_blob(&self, bytes: &[u8]) -> Result<(), StorageError> {
        validate_database_bytes(bytes)?;
        self.write_file(self.path(), bytes).await?;
        tracing::info!(path = %self.path().display(), bytes = bytes.len(), "Database written");
        Ok(())
    }

    async fn open(&self) -> Result<Database, StorageError> {
        let path = self.path();
        check_file_header(&path).await?;
        Ok(Database::open(&path).await?)
    }

    async fn remove(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stage(&self, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        validate_database_bytes(bytes)?;
        let staged = self.staged_path();
        self.write_file(staged.clone(), bytes).await?;
        tracing::debug!(path = %staged.display(), "Update staged");
        Ok(staged)
    }
}

async fn check_file_header(path: &Path) -> Result<(), StorageError> {
    use tokio::io::AsyncReadExt;

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StorageError::Missing),
        Err(e) => return Err(e.into()),
    };
    let mut header = [0u8; 16];
    if file.read_exact(&mut header).await.is_err() || &header != SQLITE_HEADER {
        return Err(StorageError::InvalidDatabase(format!(
            "{} has no SQLite header",
            path.display()
        )));
    }
    Ok(())
}

// ============================================================================
// Blob backend
// ============================================================================

/// Database kept as base64 text in the key/value store and opened as a
/// private in-memory copy.
///
/// Changes made to an opened copy are not written back; updates always
/// replace the whole blob.
pub struct BlobBackend {
    store: Arc<dyn KeyValueStore>,
}

impl BlobBackend {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StorageBackend for BlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.store.get(keys::DB_BLOB)?.is_some())
    }

    async fn write_blob(&self, bytes: &[u8]) -> Result<(), StorageError> {
        validate_database_bytes(bytes)?;
        let len = bytes.len();
        let bytes = bytes.to_vec();
        let store = Arc::clone(&self.store);
        // Encoding and persisting a large blob both block
        let encoded_len = tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let encoded = STANDARD.encode(&bytes);
            store.set(keys::DB_BLOB, &encoded)?;
            Ok(encoded.len())
        })
        .await
        .map_err(std::io::Error::other)??;
        tracing::info!(bytes = len, encoded = encoded_len, "Database blob stored");
        Ok(())
    }

    async fn open(&self) -> Result<Database, StorageError> {
        let encoded = self.store.get(keys::DB_BLOB)?.ok_or(StorageError::Missing)?;
        let bytes = STANDARD.decode(encoded.trim())?;
        validate_database_bytes(&bytes)?;

        // SQLite cannot deserialize from memory through sqlx, so the bytes
        // pass through a scratch file that is deleted on drop.
        let scratch = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let mut file = tempfile::Builder::new()
                .prefix("photoview-")
                .suffix(".db")
                .tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        let db = Database::open_in_memory().await?;
        db.import_staged(scratch.path(), MergeMode::AllOrNothing)
            .await?;
        tracing::debug!("Opened database blob in memory");
        Ok(db)
    }

    async fn remove(&self) -> Result<(), StorageError> {
        Ok(self.store.delete(keys::DB_BLOB)?)
    }

    async fn stage(&self, _bytes: &[u8]) -> Result<PathBuf, StorageError> {
        Err(StorageError::StagingUnsupported(BackendKind::Blob))
    }
}
