use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, RawFeed};
use crate::config::Config;
use crate::util::{validate_feed_url, UrlValidationError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 3;

/// Errors that can occur while fetching one feed.
///
/// Callers in the walk path never surface these: any of them makes the
/// source unavailable for the current request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL refused before any request was made
    #[error("Rejected URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Send plus body read exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Limits applied to every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
    /// Permit loopback and private-network hosts
    pub allow_private_hosts: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            allow_private_hosts: false,
        }
    }
}

impl From<&Config> for FetchSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_bytes: config.max_feed_bytes,
            allow_private_hosts: config.allow_private_hosts,
        }
    }
}

/// Build the HTTP client shared by all loaders.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("feedloom/", env!("CARGO_PKG_VERSION")))
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Fetch and parse one feed.
///
/// A single attempt: the request and the whole body read share one timeout,
/// and there are no retries. The URL is validated first.
pub async fn fetch_raw_feed(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<RawFeed, FetchError> {
    let url = validate_feed_url(url, settings.allow_private_hosts)?;

    let bytes = tokio::time::timeout(settings.timeout, fetch_bytes(client, url, settings.max_bytes))
        .await
        .map_err(|_| FetchError::Timeout(settings.timeout))??;

    parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}

async fn fetch_bytes(client: &reqwest::Client, url: url::Url, limit: usize) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, limit).await
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: reject on the declared length before streaming
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Mock</title>
    <item><title>Test</title><link>https://mock.example.com/1</link></item>
</channel></rss>"#;

    fn local_settings() -> FetchSettings {
        FetchSettings {
            allow_private_hosts: true,
            ..FetchSettings::default()
        }
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(VALID_RSS)
                .insert_header("Content-Type", "application/xml"),
        )
        .await;

        let client = build_client().unwrap();
        let raw = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &local_settings())
            .await
            .unwrap();
        assert_eq!(raw.title.as_deref(), Some("Mock"));
        assert_eq!(raw.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_http_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let result = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &local_settings()).await;
        match result {
            Err(FetchError::HttpStatus(503)) => {}
            other => panic!("Expected HttpStatus(503), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(VALID_RSS)
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let settings = FetchSettings {
            timeout: Duration::from_millis(50),
            ..local_settings()
        };
        let client = build_client().unwrap();
        let result = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &settings).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let server = serve(ResponseTemplate::new(200).set_body_string("x".repeat(2048))).await;

        let settings = FetchSettings {
            max_bytes: 1024,
            ..local_settings()
        };
        let client = build_client().unwrap();
        let result = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &settings).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_fetch_malformed_feed() {
        let server = serve(ResponseTemplate::new(200).set_body_string("<html>not a feed")).await;

        let client = build_client().unwrap();
        let result = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &local_settings()).await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_private_host_rejected_by_default() {
        let server = serve(ResponseTemplate::new(200).set_body_string(VALID_RSS)).await;

        let client = build_client().unwrap();
        let result = fetch_raw_feed(&client, &format!("{}/feed", server.uri()), &FetchSettings::default()).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
