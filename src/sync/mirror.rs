//! Ordered-mirror download with per-attempt timeout.

use futures::StreamExt;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{validate_source_url, UrlValidationError};

/// Default per-attempt budget for a mirror
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on a downloaded body (200MB)
pub const DEFAULT_MAX_BYTES: usize = 200 * 1024 * 1024;

/// Errors from fetching a payload or a piece of metadata.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The attempt exceeded its time budget and was abandoned
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The body arrived but is not what was asked for
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// The policy has no sources to try
    #[error("No download sources configured")]
    NoSources,
    /// Every source failed; failures are listed in source order
    #[error("All {} sources failed: {}", .0.len(), FailureList(.0))]
    Exhausted(Vec<MirrorFailure>),
}

/// Why one source was abandoned.
#[derive(Debug)]
pub struct MirrorFailure {
    pub url: Url,
    pub error: FetchError,
}

impl fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.error)
    }
}

struct FailureList<'a>(&'a [MirrorFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Successful attempt: which source answered and what it returned.
#[derive(Debug)]
pub struct MirrorHit<T> {
    /// Position of the source in the policy's list
    pub index: usize,
    pub url: Url,
    pub value: T,
}

/// Ordered list of equivalent sources, tried one at a time.
///
/// The first source that succeeds within `attempt_timeout` wins and later
/// sources are never contacted. Used for both the article database and
/// release assets.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    sources: Vec<Url>,
    attempt_timeout: Duration,
    max_bytes: usize,
}

impl RetryPolicy {
    /// Build a policy from URL strings, rejecting anything that is not http(s).
    pub fn new<I, S>(sources: I, attempt_timeout: Duration) -> Result<Self, UrlValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sources = sources
            .into_iter()
            .map(|s| validate_source_url(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sources,
            attempt_timeout,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn sources(&self) -> &[Url] {
        &self.sources
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Run `op` against each source in order until one succeeds.
    ///
    /// Each attempt is cancelled once `attempt_timeout` elapses. Failures are
    /// logged and collected; if none succeeds the result is
    /// [`FetchError::Exhausted`].
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<MirrorHit<T>, FetchError>
    where
        F: FnMut(Url) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if self.sources.is_empty() {
            return Err(FetchError::NoSources);
        }

        let total = self.sources.len();
        let mut failures = Vec::new();

        for (index, url) in self.sources.iter().enumerate() {
            tracing::debug!(url = %url, attempt = index + 1, total = total, "Trying source");

            let outcome = match tokio::time::timeout(self.attempt_timeout, op(url.clone())).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.attempt_timeout)),
            };

            match outcome {
                Ok(value) => {
                    if index > 0 {
                        tracing::info!(url = %url, skipped = index, "Fell back to mirror");
                    }
                    return Ok(MirrorHit {
                        index,
                        url: url.clone(),
                        value,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        attempt = index + 1,
                        total = total,
                        error = %e,
                        "Source failed"
                    );
                    failures.push(MirrorFailure {
                        url: url.clone(),
                        error: e,
                    });
                }
            }
        }

        Err(FetchError::Exhausted(failures))
    }

    /// GET the payload from the first source that serves it.
    pub async fn download(&self, client: &reqwest::Client) -> Result<MirrorHit<Vec<u8>>, FetchError> {
        self.download_validated(client, |_| Ok(())).await
    }

    /// Like [`download`](Self::download), but a body rejected by `validate`
    /// counts as a failed attempt and the next source is tried.
    pub async fn download_validated<V>(
        &self,
        client: &reqwest::Client,
        validate: V,
    ) -> Result<MirrorHit<Vec<u8>>, FetchError>
    where
        V: Fn(&[u8]) -> Result<(), FetchError>,
    {
        let validate = &validate;
        let max_bytes = self.max_bytes;

        self.run(move |url| async move {
            let response = client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }
            let bytes = read_limited_bytes(response, max_bytes).await?;
            validate(&bytes)?;
            Ok(bytes)
        })
        .await
    }
}

/// Read a response body, enforcing `limit` and the advertised Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::with_capacity(expected_length.unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
