//! Stream API HTTP Client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::clock::{ClockError, ClockSource};
use crate::schedule::{ServerTime, SignedTokens, StreamRecord};

/// Default connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur when talking to the stream API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream API is not reachable: {0}")]
    NotReachable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized")]
    Unauthorized,

    #[error("API error: {0}")]
    Api(String),
}

impl ApiError {
    fn from_send(e: reqwest::Error) -> Self {
        if e.is_connect() {
            ApiError::NotReachable(format!("Connection refused ({})", e))
        } else if e.is_timeout() {
            ApiError::NotReachable("Connection timed out".to_string())
        } else {
            ApiError::Http(e)
        }
    }
}

/// Looks up streams and playback tokens
#[async_trait]
pub trait StreamCatalog: Send + Sync {
    async fn stream(&self, stream_id: &str) -> Result<StreamRecord, ApiError>;
    async fn signed_tokens(&self, playback_id: &str) -> Result<SignedTokens, ApiError>;
}

/// Client for the stream and clock API
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client,
    base_url: String,
}

impl StreamClient {
    /// Create a client for the API at `base_url` (e.g. `https://live.example.com`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT.min(timeout))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api{}", self.base_url, path);
        self.http.request(method, &url)
    }

    /// Map non-success statuses to typed errors
    fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, ApiError> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
            s => Err(ApiError::Api(format!("Unexpected response (HTTP {})", s.as_u16()))),
        }
    }

    /// Fetch authoritative server time in ms since the UNIX epoch
    pub async fn server_time(&self) -> Result<i64, ApiError> {
        let resp = self
            .request(reqwest::Method::GET, "/time")
            .send()
            .await
            .map_err(ApiError::from_send)?;

        let body: ServerTime = Self::check_status(resp, "clock endpoint")?.json().await?;
        Ok(body.server_time)
    }

    /// Fetch a stream record
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn stream(&self, stream_id: &str) -> Result<StreamRecord, ApiError> {
        debug!("Fetching stream");

        let resp = self
            .request(reqwest::Method::GET, &format!("/streams/{}", stream_id))
            .send()
            .await
            .map_err(|e| {
                warn!("Connection error: {:?}", e);
                ApiError::from_send(e)
            })?;

        let record = Self::check_status(resp, &format!("stream {}", stream_id))?
            .json::<StreamRecord>()
            .await?;
        Ok(record)
    }

    /// List streams currently open to viewers
    pub async fn streams(&self) -> Result<Vec<StreamRecord>, ApiError> {
        let resp = self
            .request(reqwest::Method::GET, "/streams")
            .send()
            .await
            .map_err(ApiError::from_send)?;

        Ok(Self::check_status(resp, "streams")?.json().await?)
    }

    /// Request playback tokens for a signed asset
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn signed_tokens(&self, playback_id: &str) -> Result<SignedTokens, ApiError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/playback/{}/tokens", playback_id),
            )
            .send()
            .await
            .map_err(ApiError::from_send)?;

        let tokens = Self::check_status(resp, &format!("tokens for {}", playback_id))?
            .json::<SignedTokens>()
            .await?;
        Ok(tokens)
    }
}

#[async_trait]
impl ClockSource for StreamClient {
    async fn server_time_ms(&self) -> Result<i64, ClockError> {
        self.server_time().await.map_err(|e| match e {
            ApiError::Http(inner) if inner.is_decode() => ClockError::Malformed(inner.to_string()),
            other => ClockError::Unreachable(other.to_string()),
        })
    }
}

#[async_trait]
impl StreamCatalog for StreamClient {
    async fn stream(&self, stream_id: &str) -> Result<StreamRecord, ApiError> {
        StreamClient::stream(self, stream_id).await
    }

    async fn signed_tokens(&self, playback_id: &str) -> Result<SignedTokens, ApiError> {
        StreamClient::signed_tokens(self, playback_id).await
    }
}
