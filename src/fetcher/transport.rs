//! Conditional HTTP fetching

use crate::config::FetchConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH};

/// Response of a conditional fetch
///
/// The body is only read by the caller when the status is `200 OK`.
pub struct FetchResponse {
    /// HTTP status returned by the server
    pub status: StatusCode,
    /// `ETag` response header, if present
    pub etag: Option<String>,
    /// Streamed response body
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

impl FetchResponse {
    /// Response with a fully buffered body
    pub fn from_bytes(status: StatusCode, etag: Option<String>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            etag,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Transport able to ask a server for a resource only if it changed
///
/// Implementations send `If-None-Match` when `etag` is non-empty, otherwise
/// `If-Modified-Since` when `since` is set, and never both.
#[async_trait]
pub trait ConditionalGetter: Send + Sync {
    /// Fetch `url` unless the server reports it unchanged since the given validators
    async fn get_if_modified(
        &self,
        since: Option<DateTime<Utc>>,
        etag: &str,
        url: &str,
    ) -> Result<FetchResponse>;
}

/// Pick the single conditional header for a set of cached validators
///
/// The entity tag takes precedence over the timestamp.
pub fn conditional_header(
    since: Option<DateTime<Utc>>,
    etag: &str,
) -> Option<(HeaderName, String)> {
    if !etag.is_empty() {
        Some((IF_NONE_MATCH, etag.to_string()))
    } else {
        since.map(|since| (IF_MODIFIED_SINCE, http_date(since)))
    }
}

/// IMF-fixdate rendering used by HTTP date headers
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// [`ConditionalGetter`] backed by a shared `reqwest` client
#[derive(Clone)]
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    /// Build a client with the configured timeout and user agent
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Setup(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConditionalGetter for HttpGetter {
    async fn get_if_modified(
        &self,
        since: Option<DateTime<Utc>>,
        etag: &str,
        url: &str,
    ) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        if let Some((name, value)) = conditional_header(since, etag) {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("request timed out: {}", e)
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                e.to_string()
            };
            FetchError::Transport {
                url: url.to_string(),
                reason,
            }
        })?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        tracing::debug!(url = %url, status = status.as_u16(), etag = ?etag, "Conditional fetch answered");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(FetchResponse { status, etag, body })
    }
}
