//! UpstreamClient port - outbound JSON calls to source systems.

use async_trait::async_trait;

use crate::error::UpstreamError;

/// A decoded response plus the pagination hints the upstream sent along.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub body: serde_json::Value,
    pub next_page: Option<u32>,
    pub per_page: Option<u32>,
}

impl Fetched {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            next_page: None,
            per_page: None,
        }
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Fetched, UpstreamError>;
}
