//! Acquisition, update and staleness check of the local article database.

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::backend::{validate_database_bytes, BackendKind, BlobBackend, FileBackend, StorageBackend, StorageError};
use super::mirror::{FetchError, RetryPolicy};
use super::state::{keys, DailyGate, JsonFileStore, KeyValueStore, StateError};
use super::version::{needs_update, MetadataProbe, VersionDescriptor};
use crate::config::Config;
use crate::storage::{Database, DatabaseError, MergeMode, MergeReport};
use crate::util::{validate_source_url, UrlValidationError};

/// File name of the state store inside the data directory
pub const STATE_FILE_NAME: &str = "state.json";

/// Store holding the base64 database for the blob backend, kept apart from
/// the small state keys so recording a check date never rewrites it
pub const BLOB_FILE_NAME: &str = "blob.json";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to download database: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("No metadata URL configured; cannot check for updates")]
    NoProbe,
}

/// How a newer remote database is applied to the local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Close the live database and overwrite it with the download
    #[default]
    Replace,
    /// Stage the download and fold its tables into the live database
    Merge,
}

/// Result of [`DataSync::update_database`].
#[derive(Debug)]
pub struct UpdateOutcome {
    /// The handle to use from now on
    pub database: Database,
    /// Present when the update was merged rather than replaced
    pub merge: Option<MergeReport>,
}

/// Where the handle returned by [`DataSync::acquire`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// A local copy was already present
    Existing,
    /// No local copy existed; it was fetched from the mirrors
    Downloaded,
}

/// Result of comparing the recorded local version with the remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatus {
    pub available: bool,
    pub local: Option<VersionDescriptor>,
    pub remote: VersionDescriptor,
}

/// Keeps the local database present and current.
///
/// Owns the storage backend, the mirror list and the state store; all
/// collaborators are injected so tests can run against mock servers and
/// in-memory state.
pub struct DataSync {
    backend: Box<dyn StorageBackend>,
    store: Arc<dyn KeyValueStore>,
    client: reqwest::Client,
    mirrors: RetryPolicy,
    probe: Option<MetadataProbe>,
    github_token: Option<SecretString>,
    strategy: UpdateStrategy,
    merge_mode: MergeMode,
}

impl DataSync {
    pub fn new(
        backend: Box<dyn StorageBackend>,
        store: Arc<dyn KeyValueStore>,
        client: reqwest::Client,
        mirrors: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            store,
            client,
            mirrors,
            probe: None,
            github_token: None,
            strategy: UpdateStrategy::default(),
            merge_mode: MergeMode::default(),
        }
    }

    /// Wire everything up from the loaded configuration.
    ///
    /// State lives in `<data_dir>/state.json`. The file backend keeps the
    /// database next to it; the blob backend uses `<data_dir>/blob.json`.
    pub fn from_config(
        config: &Config,
        data_dir: &Path,
        client: reqwest::Client,
    ) -> Result<Self, SyncError> {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(JsonFileStore::open(data_dir.join(STATE_FILE_NAME))?);

        let backend: Box<dyn StorageBackend> = match config.backend {
            BackendKind::File => Box::new(FileBackend::new(data_dir)),
            BackendKind::Blob => {
                let blobs = JsonFileStore::open(data_dir.join(BLOB_FILE_NAME))?;
                Box::new(BlobBackend::new(Arc::new(blobs)))
            }
        };

        let mirrors = RetryPolicy::new(
            &config.mirrors,
            Duration::from_secs(config.download_timeout_secs),
        )?
        .with_max_bytes(config.max_download_bytes());

        let probe = config
            .metadata_url
            .as_deref()
            .map(validate_source_url)
            .transpose()?
            .map(|url| config.metadata_probe.probe(url));

        let mut sync = Self::new(backend, store, client, mirrors)
            .with_token(config.github_token())
            .with_strategy(config.update_strategy)
            .with_merge_mode(config.merge_mode);
        sync.probe = probe;
        Ok(sync)
    }

    pub fn with_probe(mut self, probe: MetadataProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.github_token = token;
        self
    }

    /// Merge needs a staging location; backends without one fall back to
    /// replacing.
    pub fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        if strategy == UpdateStrategy::Merge && self.backend.kind() == BackendKind::Blob {
            tracing::warn!("Blob backend cannot merge updates, replacing instead");
            self.strategy = UpdateStrategy::Replace;
        } else {
            self.strategy = strategy;
        }
        self
    }

    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Open the local database, downloading it first when there is none.
    pub async fn ensure_database(&self) -> Result<Database, SyncError> {
        let (database, _) = self.acquire().await?;
        Ok(database)
    }

    /// Like [`ensure_database`](Self::ensure_database), but also reports
    /// whether the copy was just fetched.
    pub async fn acquire(&self) -> Result<(Database, Acquired), SyncError> {
        if self.backend.exists().await? {
            tracing::debug!(backend = %self.backend.kind(), "Opening local database");
            return Ok((self.backend.open().await?, Acquired::Existing));
        }

        tracing::info!(
            backend = %self.backend.kind(),
            sources = self.mirrors.sources().len(),
            "No local database, downloading"
        );
        let remote = self.probe_quietly().await;
        let bytes = self.download().await?;
        self.backend.write_blob(&bytes).await?;
        self.record_version(remote, bytes.len())?;

        Ok((self.backend.open().await?, Acquired::Downloaded))
    }

    /// Fetch the remote database and apply it with the configured strategy.
    ///
    /// The download happens before `current` is touched, so a failed fetch
    /// leaves the local copy intact. The handle is consumed either way; after
    /// an error, reopen with [`ensure_database`](Self::ensure_database).
    pub async fn update_database(&self, current: Database) -> Result<UpdateOutcome, SyncError> {
        let remote = self.probe_quietly().await;
        let bytes = self.download().await?;

        match self.strategy {
            UpdateStrategy::Replace => {
                current.close().await;
                self.backend.write_blob(&bytes).await?;
                self.record_version(remote, bytes.len())?;
                let database = self.backend.open().await?;
                tracing::info!(bytes = bytes.len(), "Database replaced");
                Ok(UpdateOutcome {
                    database,
                    merge: None,
                })
            }
            UpdateStrategy::Merge => {
                let staged = self.backend.stage(&bytes).await?;
                let merged = current.import_staged(&staged, self.merge_mode).await;

                if let Err(e) = tokio::fs::remove_file(&staged).await {
                    tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged database");
                }

                let report = merged?;
                if report.is_complete() {
                    self.record_version(remote, bytes.len())?;
                } else {
                    tracing::warn!(
                        failed = report.failed().count(),
                        "Merge incomplete, keeping previous version record"
                    );
                }
                Ok(UpdateOutcome {
                    database: current,
                    merge: Some(report),
                })
            }
        }
    }

    /// Compare the recorded local version against the remote metadata.
    pub async fn check_for_update(&self) -> Result<UpdateStatus, SyncError> {
        let probe = self.probe.as_ref().ok_or(SyncError::NoProbe)?;
        let remote = probe.fetch(&self.client, self.github_token.as_ref()).await?;
        let local = VersionDescriptor::load(self.store.as_ref())?;
        let available = needs_update(local.as_ref(), &remote);

        tracing::info!(
            available,
            local_sha = local.as_ref().and_then(|l| l.sha.as_deref()).unwrap_or("-"),
            remote_sha = remote.sha.as_deref().unwrap_or("-"),
            "Checked for database update"
        );
        Ok(UpdateStatus {
            available,
            local,
            remote,
        })
    }

    /// [`check_for_update`](Self::check_for_update) at most once per day.
    ///
    /// Returns `None` when a check already succeeded on `today`. A failed
    /// check does not consume the day.
    pub async fn auto_check(&self, today: NaiveDate) -> Result<Option<UpdateStatus>, SyncError> {
        let gate = DailyGate::new(keys::DB_LAST_CHECK);
        if !gate.should_run(self.store.as_ref(), today)? {
            tracing::debug!(%today, "Database already checked today");
            return Ok(None);
        }

        let status = self.check_for_update().await?;
        gate.mark(self.store.as_ref(), today)?;
        Ok(Some(status))
    }

    async fn download(&self) -> Result<Vec<u8>, FetchError> {
        let hit = self
            .mirrors
            .download_validated(&self.client, |bytes| {
                validate_database_bytes(bytes).map_err(|e| FetchError::InvalidPayload(e.to_string()))
            })
            .await?;
        tracing::info!(url = %hit.url, bytes = hit.value.len(), "Downloaded database");
        Ok(hit.value)
    }

    /// Remote descriptor for recording after a download; probe failures are
    /// not fatal there.
    async fn probe_quietly(&self) -> Option<VersionDescriptor> {
        let probe = self.probe.as_ref()?;
        match probe.fetch(&self.client, self.github_token.as_ref()).await {
            Ok(remote) if !remote.is_empty() => Some(remote),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(url = %probe.url(), error = %e, "Version probe failed, recording size only");
                None
            }
        }
    }

    fn record_version(
        &self,
        remote: Option<VersionDescriptor>,
        size: usize,
    ) -> Result<(), StateError> {
        let descriptor = remote.unwrap_or_else(|| VersionDescriptor::from_size(size));
        descriptor.save(self.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::library_file;
    use crate::sync::state::MemoryStore;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fixture_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        library_file(&dir.path().join("fixture.db")).await
    }

    fn blob_sync(server: &MockServer, store: Arc<MemoryStore>) -> DataSync {
        let mirrors = RetryPolicy::new(
            [format!("{}/photo.db", server.uri())],
            Duration::from_secs(5),
        )
        .unwrap();
        DataSync::new(
            Box::new(BlobBackend::new(store.clone())),
            store,
            reqwest::Client::new(),
            mirrors,
        )
    }

    #[tokio::test]
    async fn test_ensure_downloads_once_then_reuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.db"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture_bytes().await))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let sync = blob_sync(&server, store.clone());

        let db = sync.ensure_database().await.unwrap();
        assert_eq!(db.get_articles(None, 20, 0).await.unwrap().len(), 5);

        // Second call finds the stored blob and does not hit the network
        let db = sync.ensure_database().await.unwrap();
        assert_eq!(db.get_categories().await.unwrap().len(), 3);

        let recorded = VersionDescriptor::load(store.as_ref()).unwrap().unwrap();
        assert!(recorded.size.is_some());
        assert_eq!(recorded.sha, None);
    }

    #[tokio::test]
    async fn test_acquire_reports_download_only_first_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.db"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture_bytes().await))
            .expect(1)
            .mount(&server)
            .await;

        let sync = blob_sync(&server, Arc::new(MemoryStore::new()));

        let (db, acquired) = sync.acquire().await.unwrap();
        assert_eq!(acquired, Acquired::Downloaded);
        db.close().await;

        let (_db, acquired) = sync.acquire().await.unwrap();
        assert_eq!(acquired, Acquired::Existing);
    }

    #[test]
    fn test_from_config_uses_default_mirrors() {
        let dir = tempfile::tempdir().unwrap();
        let sync = DataSync::from_config(&Config::default(), dir.path(), reqwest::Client::new())
            .unwrap();
        assert_eq!(sync.mirrors.sources().len(), 2);
        assert!(sync.probe.is_some());
    }

    #[tokio::test]
    async fn test_blob_backend_keeps_blob_out_of_state_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.db"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture_bytes().await))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            backend: BackendKind::Blob,
            mirrors: vec![format!("{}/photo.db", server.uri())],
            metadata_url: None,
            ..Config::default()
        };
        let sync = DataSync::from_config(&config, dir.path(), reqwest::Client::new()).unwrap();
        sync.ensure_database().await.unwrap();
        sync.store().set(keys::DB_LAST_CHECK, "2026-10-19").unwrap();

        let state = JsonFileStore::open(dir.path().join(STATE_FILE_NAME)).unwrap();
        assert!(state.get(keys::DB_BLOB).unwrap().is_none());
        assert!(state.get(keys::DB_VERSION).unwrap().is_some());
        assert_eq!(state.get(keys::DB_LAST_CHECK).unwrap().as_deref(), Some("2026-10-19"));

        let blobs = JsonFileStore::open(dir.path().join(BLOB_FILE_NAME)).unwrap();
        assert!(blobs.get(keys::DB_BLOB).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ensure_rejects_html_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let sync = blob_sync(&server, store.clone());

        let err = sync.ensure_database().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(FetchError::Exhausted(_))));
        assert!(!sync.backend().exists().await.unwrap());
        assert_eq!(VersionDescriptor::load(store.as_ref()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_without_probe() {
        let server = MockServer::start().await;
        let sync = blob_sync(&server, Arc::new(MemoryStore::new()));
        assert!(matches!(
            sync.check_for_update().await,
            Err(SyncError::NoProbe)
        ));
    }

    #[tokio::test]
    async fn test_merge_strategy_downgraded_on_blob_backend() {
        let server = MockServer::start().await;
        let sync = blob_sync(&server, Arc::new(MemoryStore::new()))
            .with_strategy(UpdateStrategy::Merge);
        assert_eq!(sync.strategy(), UpdateStrategy::Replace);
    }

    #[test]
    fn test_update_strategy_serde() {
        assert_eq!(
            serde_json::from_str::<UpdateStrategy>("\"merge\"").unwrap(),
            UpdateStrategy::Merge
        );
        assert_eq!(UpdateStrategy::default(), UpdateStrategy::Replace);
    }
}
