//! Version descriptors and the staleness decision.

use reqwest::header::{HeaderName, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::mirror::{read_limited_bytes, FetchError};
use super::state::{keys, KeyValueStore, StateError};
use crate::util::authorize_github;

/// Time budget for a metadata probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound for a metadata document. The GitHub contents API inlines
/// files up to 1 MiB as base64 `content`, so its replies run to ~1.4 MiB.
const MAX_METADATA_SIZE: usize = 4 * 1024 * 1024;

/// Cheap fingerprint of a remote or local database.
///
/// Every field is optional because different probes expose different signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Content hash (git blob sha, ETag, ...)
    pub sha: Option<String>,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
}

impl VersionDescriptor {
    /// Descriptor known only by the size of a downloaded payload.
    pub fn from_size(size: usize) -> Self {
        Self {
            size: Some(size as u64),
            ..Self::default()
        }
    }

    /// The descriptor recorded for the local database, if any.
    ///
    /// A stored value that no longer parses is treated as absent, which makes
    /// the next check recommend an update.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>, StateError> {
        let Some(raw) = store.get(keys::DB_VERSION)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable version descriptor");
                Ok(None)
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StateError> {
        store.set(keys::DB_VERSION, &serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.sha.is_none() && self.size.is_none() && self.last_modified.is_none()
    }
}

/// Decide whether the remote database differs from the local one.
///
/// - No local descriptor: update.
/// - Otherwise compare the first signal both sides have, in priority order
///   hash, size, timestamp. Lower-priority fields are ignored once a
///   higher-priority one is comparable.
/// - Nothing comparable: update, since staleness cannot be ruled out.
pub fn needs_update(local: Option<&VersionDescriptor>, remote: &VersionDescriptor) -> bool {
    let Some(local) = local else {
        return true;
    };

    if let (Some(a), Some(b)) = (&local.sha, &remote.sha) {
        return a != b;
    }
    if let (Some(a), Some(b)) = (local.size, remote.size) {
        return a != b;
    }
    if let (Some(a), Some(b)) = (&local.last_modified, &remote.last_modified) {
        return a != b;
    }
    true
}

// ============================================================================
// Metadata probes
// ============================================================================

/// Configured probe flavour, paired with a URL at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    Json,
    Head,
}

impl ProbeKind {
    pub fn probe(self, url: Url) -> MetadataProbe {
        match self {
            ProbeKind::Json => MetadataProbe::Json(url),
            ProbeKind::Head => MetadataProbe::Head(url),
        }
    }
}

/// How to learn the remote version without downloading the payload.
#[derive(Debug, Clone)]
pub enum MetadataProbe {
    /// GET a JSON document carrying `sha`, `size` and `last_modified`
    /// (`updated_at` also accepted), e.g. the GitHub contents API
    Json(Url),
    /// HEAD the payload itself: `ETag`, `Content-Length`, `Last-Modified`
    Head(Url),
}

#[derive(Debug, Deserialize)]
struct RemoteMetadata {
    sha: Option<String>,
    size: Option<u64>,
    #[serde(alias = "updated_at", alias = "lastModified")]
    last_modified: Option<String>,
}

impl MetadataProbe {
    pub fn url(&self) -> &Url {
        match self {
            MetadataProbe::Json(url) | MetadataProbe::Head(url) => url,
        }
    }

    /// Fetch the remote descriptor.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        token: Option<&SecretString>,
    ) -> Result<VersionDescriptor, FetchError> {
        tokio::time::timeout(PROBE_TIMEOUT, self.fetch_inner(client, token))
            .await
            .map_err(|_| FetchError::Timeout(PROBE_TIMEOUT))?
    }

    async fn fetch_inner(
        &self,
        client: &reqwest::Client,
        token: Option<&SecretString>,
    ) -> Result<VersionDescriptor, FetchError> {
        let url = self.url();
        let request = match self {
            MetadataProbe::Json(_) => client
                .get(url.clone())
                .header("Accept", "application/vnd.github.v3+json"),
            MetadataProbe::Head(_) => client.head(url.clone()),
        };
        let response = authorize_github(request, url, token).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let header_last_modified = header(LAST_MODIFIED);

        let descriptor = match self {
            MetadataProbe::Head(_) => VersionDescriptor {
                sha: header(ETAG).map(|etag| normalize_etag(&etag)),
                size: header(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
                last_modified: header_last_modified,
            },
            MetadataProbe::Json(_) => {
                let body = read_limited_bytes(response, MAX_METADATA_SIZE).await?;
                let meta: RemoteMetadata = serde_json::from_slice(&body)
                    .map_err(|e| FetchError::InvalidPayload(format!("metadata JSON: {e}")))?;
                VersionDescriptor {
                    sha: meta.sha,
                    size: meta.size,
                    last_modified: meta.last_modified.or(header_last_modified),
                }
            }
        };

        tracing::debug!(
            url = %url,
            sha = descriptor.sha.as_deref().unwrap_or("-"),
            size = descriptor.size,
            "Probed remote database version"
        );
        Ok(descriptor)
    }
}

/// Strip the weak marker and quotes so `W/"abc"` and `"abc"` compare equal.
fn normalize_etag(etag: &str) -> String {
    etag.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string()
}
