//! Configuration file parser for ~/.config/photoview/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::release::{DEFAULT_API_BASE, DEFAULT_ASSET_EXTENSION, DEFAULT_CDN_BASE};
use crate::storage::MergeMode;
use crate::sync::{BackendKind, ProbeKind, UpdateStrategy};

/// Environment variable that overrides `github_token`
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Repository publishing both the database and application releases
pub const DEFAULT_REPOSITORY: &str = "sky2048/photo-app";

/// Database mirrors used when the config file names none: GitHub raw first,
/// then the jsDelivr copy of the same branch
pub const DEFAULT_MIRRORS: [&str; 2] = [
    "https://raw.githubusercontent.com/sky2048/photo-app/master/photo.db",
    "https://cdn.jsdelivr.net/gh/sky2048/photo-app@master/photo.db",
];

/// GitHub contents API entry for the database; reports its blob sha and size
pub const DEFAULT_METADATA_URL: &str =
    "https://api.github.com/repos/sky2048/photo-app/contents/photo.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks `github_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the local database lives: `file` or `blob`.
    pub backend: BackendKind,

    /// Data directory. Defaults to the config directory.
    pub data_dir: Option<PathBuf>,

    /// Database download URLs, tried in order.
    pub mirrors: Vec<String>,

    /// Metadata endpoint describing the remote database version.
    pub metadata_url: Option<String>,

    /// How `metadata_url` is read: `json` document or `head` request.
    pub metadata_probe: ProbeKind,

    /// `replace` or `merge`.
    pub update_strategy: UpdateStrategy,

    /// Failure handling for merges: `best_effort` or `all_or_nothing`.
    pub merge_mode: MergeMode,

    /// Per-mirror time budget in seconds.
    pub download_timeout_secs: u64,

    /// Largest accepted download in megabytes.
    pub max_download_mb: u64,

    /// GitHub repository (`owner/repo`) publishing application releases.
    pub release_repo: Option<String>,

    pub github_api_base: String,

    pub cdn_base: String,

    /// Release asset suffix for this platform.
    pub asset_extension: String,

    /// Version compared against the latest release.
    pub current_version: String,

    /// GitHub token (alternative to GITHUB_TOKEN env var).
    /// Env var takes precedence over config file.
    pub github_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            data_dir: None,
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            metadata_url: Some(DEFAULT_METADATA_URL.to_string()),
            metadata_probe: ProbeKind::Json,
            update_strategy: UpdateStrategy::Replace,
            merge_mode: MergeMode::BestEffort,
            download_timeout_secs: 60,
            max_download_mb: 200,
            release_repo: Some(DEFAULT_REPOSITORY.to_string()),
            github_api_base: DEFAULT_API_BASE.to_string(),
            cdn_base: DEFAULT_CDN_BASE.to_string(),
            asset_extension: DEFAULT_ASSET_EXTENSION.to_string(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            github_token: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("data_dir", &self.data_dir)
            .field("mirrors", &self.mirrors)
            .field("metadata_url", &self.metadata_url)
            .field("metadata_probe", &self.metadata_probe)
            .field("update_strategy", &self.update_strategy)
            .field("merge_mode", &self.merge_mode)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("max_download_mb", &self.max_download_mb)
            .field("release_repo", &self.release_repo)
            .field("github_api_base", &self.github_api_base)
            .field("cdn_base", &self.cdn_base)
            .field("asset_extension", &self.asset_extension)
            .field("current_version", &self.current_version)
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 15] = [
        "backend",
        "data_dir",
        "mirrors",
        "metadata_url",
        "metadata_probe",
        "update_strategy",
        "merge_mode",
        "download_timeout_secs",
        "max_download_mb",
        "release_repo",
        "github_api_base",
        "cdn_base",
        "asset_extension",
        "current_version",
        "github_token",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = %config.backend,
            mirrors = config.mirrors.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// The GitHub token, preferring the environment over the file.
    pub fn github_token(&self) -> Option<SecretString> {
        Self::token_from(std::env::var(GITHUB_TOKEN_ENV).ok(), self.github_token.as_deref())
    }

    fn token_from(env: Option<String>, file: Option<&str>) -> Option<SecretString> {
        env.filter(|t| !t.trim().is_empty())
            .or_else(|| file.filter(|t| !t.trim().is_empty()).map(str::to_string))
            .map(SecretString::from)
    }

    pub fn max_download_bytes(&self) -> usize {
        usize::try_from(self.max_download_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    /// Configured data directory, or `fallback` when unset.
    pub fn data_dir_or(&self, fallback: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.mirrors.len(), 2);
        assert!(config.mirrors[0].starts_with("https://raw.githubusercontent.com/"));
        assert!(config.mirrors[1].starts_with("https://cdn.jsdelivr.net/gh/"));
        assert_eq!(config.metadata_url.as_deref(), Some(DEFAULT_METADATA_URL));
        assert_eq!(config.release_repo.as_deref(), Some(DEFAULT_REPOSITORY));
        assert_eq!(config.metadata_probe, ProbeKind::Json);
        assert_eq!(config.update_strategy, UpdateStrategy::Replace);
        assert_eq!(config.merge_mode, MergeMode::BestEffort);
        assert_eq!(config.download_timeout_secs, 60);
        assert_eq!(config.asset_extension, ".apk");
        assert_eq!(config.current_version, env!("CARGO_PKG_VERSION"));
        assert!(config.github_token.is_none());
    }

    #[test]
    fn test_default_sources_are_valid_urls() {
        let config = Config::default();
        for url in config.mirrors.iter().chain(config.metadata_url.iter()) {
            assert!(crate::util::validate_source_url(url).is_ok(), "{url}");
        }
    }

    #[test]
    fn test_explicit_mirrors_replace_defaults() {
        let (_dir, path) = write_config("mirrors = [\"https://mirror.example.com/photo.db\"]\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.mirrors, vec!["https://mirror.example.com/photo.db"]);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.backend, BackendKind::File);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_download_mb, 200);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("backend = \"blob\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Blob);
        assert_eq!(config.cdn_base, DEFAULT_CDN_BASE);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
backend = "file"
data_dir = "/var/lib/photoview"
mirrors = [
    "https://raw.githubusercontent.com/acme/photos/main/photo.db",
    "https://cdn.jsdelivr.net/gh/acme/photos@main/photo.db",
]
metadata_url = "https://api.github.com/repos/acme/photos/contents/photo.db"
metadata_probe = "head"
update_strategy = "merge"
merge_mode = "all_or_nothing"
download_timeout_secs = 30
max_download_mb = 50
release_repo = "acme/photos"
asset_extension = ".dmg"
current_version = "1.0.0"
github_token = "ghp_file"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/photoview")));
        assert_eq!(config.mirrors.len(), 2);
        assert_eq!(config.metadata_probe, ProbeKind::Head);
        assert_eq!(config.update_strategy, UpdateStrategy::Merge);
        assert_eq!(config.merge_mode, MergeMode::AllOrNothing);
        assert_eq!(config.download_timeout_secs, 30);
        assert_eq!(config.max_download_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.release_repo.as_deref(), Some("acme/photos"));
        assert_eq!(config.asset_extension, ".dmg");
        assert_eq!(config.current_version, "1.0.0");
        assert_eq!(config.github_token.as_deref(), Some("ghp_file"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("backend = \"blob\"\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Blob);
    }

    #[test]
    fn test_unknown_enum_value_returns_error() {
        let (_dir, path) = write_config("backend = \"s3\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_env_token_wins_over_file() {
        let token = Config::token_from(Some("ghp_env".into()), Some("ghp_file")).unwrap();
        assert_eq!(token.expose_secret(), "ghp_env");

        let token = Config::token_from(None, Some("ghp_file")).unwrap();
        assert_eq!(token.expose_secret(), "ghp_file");

        let token = Config::token_from(Some("  ".into()), Some("ghp_file")).unwrap();
        assert_eq!(token.expose_secret(), "ghp_file");

        assert!(Config::token_from(None, Some("")).is_none());
    }

    #[test]
    fn test_debug_masks_token() {
        let config = Config {
            github_token: Some("ghp_super_secret".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("ghp_super_secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_data_dir_fallback() {
        let config = Config::default();
        assert_eq!(
            config.data_dir_or(Path::new("/home/u/.config/photoview")),
            PathBuf::from("/home/u/.config/photoview")
        );
    }
}
