//! In-memory sink, used by the CLI and tests
//!
//! Real deployments inject their own `ResultSink` (database, message bus);
//! the engine never knows the difference.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use netwarden_common::{Record, ResultSink, SinkError};

/// Collects every appended record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&self, record: Record) -> Result<(), SinkError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
