use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::error::{MondegoError, UpstreamError};
use crate::ports::{SinkRecord, SinkWriter};

/// Sink that keeps every record in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
    unreachable: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose probe always fails.
    pub fn unreachable() -> Self {
        let sink = Self::default();
        sink.unreachable.store(true, Ordering::SeqCst);
        sink
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.lock().clone()
    }

    pub fn records_of(&self, record_type: &str) -> Vec<SinkRecord> {
        self.lock()
            .iter()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl SinkWriter for MemorySink {
    fn write(&self, record: SinkRecord) {
        info!(record = %record.key(), "writing");
        self.lock().push(record);
    }

    async fn ping(&self) -> Result<(), MondegoError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transport("memory sink marked unreachable".into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn keeps_records_in_write_order() {
        let sink = MemorySink::new();
        sink.write(SinkRecord::new("c", "build", "1", json!({})));
        sink.write(SinkRecord::new("c", "release", "2", json!({})));
        sink.write(SinkRecord::new("c", "build", "3", json!({})));

        assert_eq!(sink.len(), 3);
        let builds: Vec<_> = sink.records_of("build").into_iter().map(|r| r.record_id).collect();
        assert_eq!(builds, vec!["1", "3"]);
        sink.ping().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_sink_fails_the_probe() {
        let sink = MemorySink::unreachable();
        assert!(sink.ping().await.is_err());
        assert!(sink.is_empty());
    }
}
