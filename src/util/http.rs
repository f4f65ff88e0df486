use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// User agent sent on every request. GitHub's API rejects requests without one.
pub const APP_USER_AGENT: &str = concat!("photoview/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client.
///
/// No overall request timeout is set here: per-attempt deadlines are owned by
/// the retry policy so each mirror gets its own budget.
pub fn create_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()
}

/// Host that is allowed to receive the GitHub token.
const GITHUB_API_HOST: &str = "api.github.com";

/// Attach the GitHub token to `request` when `url` points at the official API.
///
/// Mirrors, CDNs and overridden API bases never see the token.
pub fn authorize_github(
    request: RequestBuilder,
    url: &Url,
    token: Option<&SecretString>,
) -> RequestBuilder {
    let Some(token) = token else {
        return request;
    };
    if url.scheme() == "https" && url.host_str() == Some(GITHUB_API_HOST) {
        request.header("Authorization", format!("Bearer {}", token.expose_secret()))
    } else {
        tracing::debug!(host = url.host_str().unwrap_or(""), "Skipping token for non-GitHub host");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_header(url: &str) -> Option<String> {
        let client = Client::new();
        let url = Url::parse(url).unwrap();
        let token = SecretString::from("ghp_test");
        let request = authorize_github(client.get(url.clone()), &url, Some(&token))
            .build()
            .unwrap();
        request
            .headers()
            .get("Authorization")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn test_token_sent_to_github_api() {
        assert_eq!(
            auth_header("https://api.github.com/repos/o/r/releases/latest").as_deref(),
            Some("Bearer ghp_test")
        );
    }

    #[test]
    fn test_token_withheld_from_other_hosts() {
        assert_eq!(auth_header("https://cdn.jsdelivr.net/gh/o/r@v1/app.apk"), None);
        assert_eq!(auth_header("http://api.github.com/repos/o/r"), None);
        assert_eq!(auth_header("http://127.0.0.1:8080/repos/o/r"), None);
    }

    #[test]
    fn test_user_agent_names_crate() {
        assert!(APP_USER_AGENT.starts_with("photoview/"));
    }
}
