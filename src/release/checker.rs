use chrono::NaiveDate;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::version_compare::{is_newer, normalize_tag};
use crate::config::Config;
use crate::sync::{
    keys, read_limited_bytes, DailyGate, FetchError, KeyValueStore, RetryPolicy, StateError,
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_BYTES,
};
use crate::util::{atomic_write, authorize_github, validate_source_url, UrlValidationError};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CDN_BASE: &str = "https://cdn.jsdelivr.net";
pub const DEFAULT_ASSET_EXTENSION: &str = ".apk";

const NO_RELEASE_NOTES: &str = "No release notes";

/// Budget for the release API call
const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Release documents are a few KB; the cap only guards against garbage
const MAX_RELEASE_JSON: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Invalid repository '{0}', expected owner/repo")]
    InvalidRepo(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Release request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Repository has no published release")]
    NoRelease,

    #[error("GitHub API rate limit exceeded; set GITHUB_TOKEN or try later")]
    RateLimited,

    #[error("Unexpected release response: {0}")]
    InvalidResponse(String),

    #[error("Refusing to write asset with unsafe name '{0}'")]
    UnsafeAssetName(String),

    #[error("Failed to write asset: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<reqwest::Error> for ReleaseError {
    fn from(e: reqwest::Error) -> Self {
        ReleaseError::Fetch(FetchError::Network(e))
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

/// Downloadable build attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub size: u64,
    /// CDN copy first, then GitHub's own download URL
    pub mirrors: Vec<Url>,
}

impl ReleaseAsset {
    /// The URL handed to a browser.
    pub fn primary_url(&self) -> Option<&Url> {
        self.mirrors.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub current_version: String,
    pub latest_version: String,
    pub tag: String,
    pub update_available: bool,
    pub release_notes: String,
    pub html_url: Option<String>,
    pub asset: Option<ReleaseAsset>,
}

/// Checks a GitHub repository's latest release against the running version.
pub struct ReleaseChecker {
    client: reqwest::Client,
    api_base: Url,
    cdn_base: Url,
    owner: String,
    repo: String,
    current_version: String,
    asset_extension: String,
    token: Option<SecretString>,
    download_timeout: Duration,
    max_bytes: usize,
}

impl ReleaseChecker {
    /// `repository` is `owner/repo`.
    pub fn new(
        client: reqwest::Client,
        repository: &str,
        current_version: impl Into<String>,
    ) -> Result<Self, ReleaseError> {
        let (owner, repo) = parse_repository(repository)?;
        Ok(Self {
            client,
            api_base: validate_source_url(DEFAULT_API_BASE)?,
            cdn_base: validate_source_url(DEFAULT_CDN_BASE)?,
            owner,
            repo,
            current_version: current_version.into(),
            asset_extension: DEFAULT_ASSET_EXTENSION.to_string(),
            token: None,
            download_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    /// Build a checker when `release_repo` is configured.
    pub fn from_config(
        config: &Config,
        client: reqwest::Client,
    ) -> Result<Option<Self>, ReleaseError> {
        let Some(repository) = config.release_repo.as_deref() else {
            return Ok(None);
        };
        let checker = Self::new(client, repository, config.current_version.clone())?
            .with_api_base(&config.github_api_base)?
            .with_cdn_base(&config.cdn_base)?
            .with_asset_extension(&config.asset_extension)
            .with_token(config.github_token())
            .with_download_limits(
                Duration::from_secs(config.download_timeout_secs),
                config.max_download_bytes(),
            );
        Ok(Some(checker))
    }

    /// Point at another API host (GitHub Enterprise, tests).
    ///
    /// The token is only ever sent to `api.github.com`.
    pub fn with_api_base(mut self, base: &str) -> Result<Self, ReleaseError> {
        self.api_base = validate_source_url(base)?;
        Ok(self)
    }

    pub fn with_cdn_base(mut self, base: &str) -> Result<Self, ReleaseError> {
        self.cdn_base = validate_source_url(base)?;
        Ok(self)
    }

    pub fn with_asset_extension(mut self, extension: &str) -> Self {
        self.asset_extension = extension.to_string();
        self
    }

    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }

    pub fn with_download_limits(mut self, timeout: Duration, max_bytes: usize) -> Self {
        self.download_timeout = timeout;
        self.max_bytes = max_bytes;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Fetch the latest release and compare it with the running version.
    pub async fn check(&self) -> Result<ReleaseInfo, ReleaseError> {
        let url = join_base(
            &self.api_base,
            &format!("repos/{}/{}/releases/latest", self.owner, self.repo),
        )?;

        tracing::debug!(url = %url, "Checking latest release");
        let request = self
            .client
            .get(url.clone())
            .header("Accept", "application/vnd.github.v3+json");
        let response = tokio::time::timeout(
            API_TIMEOUT,
            authorize_github(request, &url, self.token.as_ref()).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout(API_TIMEOUT))??;

        match response.status().as_u16() {
            200..=299 => {}
            404 => return Err(ReleaseError::NoRelease),
            403 | 429 => return Err(ReleaseError::RateLimited),
            status => return Err(FetchError::HttpStatus(status).into()),
        }

        let body = read_limited_bytes(response, MAX_RELEASE_JSON).await?;
        let release: GitHubRelease = serde_json::from_slice(&body)
            .map_err(|e| ReleaseError::InvalidResponse(e.to_string()))?;

        let info = self.release_info(release)?;
        tracing::info!(
            current = %info.current_version,
            latest = %info.latest_version,
            update_available = info.update_available,
            asset = info.asset.as_ref().map(|a| a.name.as_str()).unwrap_or("-"),
            "Checked latest release"
        );
        Ok(info)
    }

    /// [`check`](Self::check) at most once per day.
    ///
    /// `None` when a check already succeeded on `today`.
    pub async fn auto_check(
        &self,
        store: &dyn KeyValueStore,
        today: NaiveDate,
    ) -> Result<Option<ReleaseInfo>, ReleaseError> {
        let gate = DailyGate::new(keys::RELEASE_LAST_CHECK);
        if !gate.should_run(store, today)? {
            tracing::debug!(%today, "Release already checked today");
            return Ok(None);
        }
        let info = self.check().await?;
        gate.mark(store, today)?;
        Ok(Some(info))
    }

    /// Download `asset` into `dest_dir`, trying the CDN before GitHub.
    ///
    /// Returns the path written.
    pub async fn download_asset(
        &self,
        asset: &ReleaseAsset,
        dest_dir: &Path,
    ) -> Result<PathBuf, ReleaseError> {
        let file_name = Path::new(&asset.name)
            .file_name()
            .filter(|name| name.to_str() == Some(asset.name.as_str()))
            .ok_or_else(|| ReleaseError::UnsafeAssetName(asset.name.clone()))?;
        let dest = dest_dir.join(file_name);

        let policy = RetryPolicy::new(asset.mirrors.iter().map(Url::as_str), self.download_timeout)?
            .with_max_bytes(self.max_bytes);
        let hit = policy.download(&self.client).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let target = dest.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &hit.value))
            .await
            .map_err(std::io::Error::other)??;

        tracing::info!(path = %dest.display(), "Release asset downloaded");
        Ok(dest)
    }

    fn release_info(&self, release: GitHubRelease) -> Result<ReleaseInfo, ReleaseError> {
        let latest_version = normalize_tag(&release.tag_name).to_string();
        if latest_version.is_empty() {
            return Err(ReleaseError::InvalidResponse("release has an empty tag".into()));
        }

        let asset = release
            .assets
            .iter()
            .find(|a| a.name.ends_with(&self.asset_extension))
            .map(|a| self.asset_mirrors(&release.tag_name, a))
            .transpose()?;

        let release_notes = release
            .body
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| NO_RELEASE_NOTES.to_string());

        Ok(ReleaseInfo {
            update_available: is_newer(&self.current_version, &latest_version),
            current_version: self.current_version.clone(),
            latest_version,
            tag: release.tag_name,
            release_notes,
            html_url: release.html_url,
            asset,
        })
    }

    fn asset_mirrors(&self, tag: &str, asset: &GitHubAsset) -> Result<ReleaseAsset, ReleaseError> {
        let cdn = join_base(
            &self.cdn_base,
            &format!("gh/{}/{}@{}/{}", self.owner, self.repo, tag, asset.name),
        )?;
        let mut mirrors = vec![cdn];
        match validate_source_url(&asset.browser_download_url) {
            Ok(direct) => mirrors.push(direct),
            Err(e) => tracing::warn!(
                url = %asset.browser_download_url,
                error = %e,
                "Ignoring invalid asset download URL"
            ),
        }
        Ok(ReleaseAsset {
            name: asset.name.clone(),
            size: asset.size,
            mirrors,
        })
    }
}

fn parse_repository(repository: &str) -> Result<(String, String), ReleaseError> {
    let invalid = || ReleaseError::InvalidRepo(repository.to_string());
    let (owner, repo) = repository.trim().split_once('/').ok_or_else(invalid)?;
    let valid = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(owner) || !valid(repo) {
        return Err(invalid());
    }
    Ok((owner.to_string(), repo.to_string()))
}

/// Append `path` to `base`, keeping any path prefix the base already has.
fn join_base(base: &Url, path: &str) -> Result<Url, ReleaseError> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    Ok(validate_source_url(&joined)?)
}
