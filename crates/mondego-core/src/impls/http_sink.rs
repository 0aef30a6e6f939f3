//! Document-store sink over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{MondegoError, UpstreamError};
use crate::ports::{SinkRecord, SinkWriter};

/// Writes each record with `PUT {base}/{collection}/{record_type}/{record_id}`.
///
/// Writes are spawned and never awaited by the caller; failures are logged.
/// Each write gives up after `request_timeout`, so a hung sink cannot pile up
/// pending writes.
#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    base: Url,
    probe_timeout: Duration,
}

impl HttpSink {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, MondegoError> {
        let base = Url::parse(base_url).map_err(|e| MondegoError::invalid_url(base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(MondegoError::invalid_url(base_url, "not a base url"));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MondegoError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base,
            probe_timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    async fn put(&self, record: &SinkRecord) -> Result<(), MondegoError> {
        let response = self
            .client
            .put(self.record_url(record))
            .json(&record.data)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()).into());
        }
        Ok(())
    }

    /// Record address with every part percent-encoded as its own path segment.
    pub fn record_url(&self, record: &SinkRecord) -> Url {
        let mut url = self.base.clone();
        // `new` rejected cannot-be-a-base urls, so segments are always available
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                record.collection.as_str(),
                record.record_type.as_str(),
                record.record_id.as_str(),
            ]);
        }
        url
    }
}

#[async_trait]
impl SinkWriter for HttpSink {
    fn write(&self, record: SinkRecord) {
        let sink = self.clone();
        tokio::spawn(async move {
            let key = record.key();
            match sink.put(&record).await {
                Ok(()) => debug!(record = %key, "record written"),
                Err(err) => warn!(record = %key, error = %err, "sink write failed"),
            }
        });
    }

    async fn ping(&self) -> Result<(), MondegoError> {
        let response = self
            .client
            .head(self.base.clone())
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()).into());
        }
        Ok(())
    }
}
