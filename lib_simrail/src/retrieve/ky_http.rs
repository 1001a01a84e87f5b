//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with middleware for
//! exponential backoff retries. Bodies are returned as text: upstream payloads
//! are validated by the caller, which must tolerate non-JSON answers.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// Per-request timeout. A stuck socket must not outlive the orchestrator watchdog.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 3;

/// Raw outcome of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response body, possibly empty.
    pub body: String,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs and automatic
/// retries of transient failures.
#[derive(Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a retry policy.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL or the TLS backend cannot
    /// be initialised.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("simrail-ingest/0.1"));

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        // Configure an exponential backoff policy with 3 retries
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    /// The base URL every path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a `GET` on `path` with the given query pairs.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, the network exchange or body
    /// decoding fails. Non-2xx statuses are not errors; check `success`.
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<ApiResponse> {
        let full_url = self.base_url.join(path)?;

        let response: reqwest::Response = self.inner.get(full_url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(ApiResponse {
            body,
            status: status.as_u16(),
            success: status.is_success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_base_url_is_rejected() {
        assert!(ApiClient::new("panel.simrail.eu/").is_err());
    }

    #[test]
    fn paths_join_onto_base() {
        let client = ApiClient::new("https://api1.aws.simrail.eu:8082/api/").unwrap();
        let joined = client.base_url().join("getTime").unwrap();
        assert_eq!(joined.as_str(), "https://api1.aws.simrail.eu:8082/api/getTime");
    }
}
