use thiserror::Error;
use url::Url;

/// Errors raised when a configured endpoint is not a usable download source.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Validates a mirror, metadata or API URL.
///
/// Only `http` and `https` are accepted; `file://` and friends would let a
/// config file smuggle local paths into the downloader. Loopback hosts are
/// allowed since local mirrors are a legitimate setup (and what tests use).
///
/// ```
/// use photoview::util::validate_source_url;
///
/// assert!(validate_source_url("https://cdn.jsdelivr.net/gh/o/r@master/photo.db").is_ok());
/// assert!(validate_source_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_source_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost(url_str.to_owned()));
    }

    Ok(url)
}
