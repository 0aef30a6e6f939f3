//! SinkWriter port - the search/index store records end up in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MondegoError;

/// One record addressed by collection, type and id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub collection: String,
    pub record_type: String,
    pub record_id: String,
    pub data: serde_json::Value,
}

impl SinkRecord {
    pub fn new(
        collection: impl Into<String>,
        record_type: impl Into<String>,
        record_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_type: record_type.into(),
            record_id: record_id.into(),
            data,
        }
    }

    /// `collection/record_type/record_id`, used for logging.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.collection, self.record_type, self.record_id)
    }
}

#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Fire-and-forget. Implementations log their own failures.
    fn write(&self, record: SinkRecord);

    /// Connectivity probe. Success opens the readiness gate.
    async fn ping(&self) -> Result<(), MondegoError>;
}
