//! reqwest-backed upstream client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::error::{MondegoError, UpstreamError};
use crate::ports::{Fetched, UpstreamClient};

const NEXT_PAGE: &str = "x-next-page";
const PER_PAGE: &str = "x-per-page";
const PRIVATE_TOKEN: &str = "private-token";

/// GET-only JSON client.
///
/// Any status of 300 or above is an error. Pagination hints are read from the
/// `x-next-page` and `x-per-page` response headers.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, MondegoError> {
        Self::build(timeout, HeaderMap::new())
    }

    /// Client that sends a `PRIVATE-TOKEN` header with every call.
    pub fn with_private_token(timeout: Duration, token: &str) -> Result<Self, MondegoError> {
        let mut value = HeaderValue::from_str(token)
            .map_err(|e| MondegoError::Config(format!("private token: {e}")))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(PRIVATE_TOKEN, value);
        Self::build(timeout, headers)
    }

    fn build(timeout: Duration, headers: HeaderMap) -> Result<Self, MondegoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| MondegoError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

/// Numeric header value. Missing, empty or malformed values count as absent.
fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn get_json(&self, url: &str) -> Result<Fetched, UpstreamError> {
        debug!(url, "calling upstream");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(UpstreamError::Status(status));
        }

        let next_page = header_u32(response.headers(), NEXT_PAGE);
        let per_page = header_u32(response.headers(), PER_PAGE);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let body = serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(Fetched {
            body,
            next_page,
            per_page,
        })
    }
}
