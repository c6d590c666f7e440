//! Collaborator traits consumed by the engine
//!
//! The persistence and live-broadcast layers live outside the core; the
//! engine only ever calls these narrow capabilities.

use crate::error::SinkError;
use crate::types::{Alert, FlowEvent, PortResult};
use async_trait::async_trait;

/// A finalized record handed off to the sink.
#[derive(Debug, Clone)]
pub enum Record {
    Port(PortResult),
    Flow(FlowEvent),
    Alert(Alert),
}

/// Persistence capability. The engine never assumes an append succeeds
/// instantly; a failure is logged and counted, never fatal to the run.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append(&self, record: Record) -> Result<(), SinkError>;

    /// Batch append. Default loops over `append`; sinks with cheaper bulk
    /// paths should override.
    async fn append_batch(&self, records: Vec<Record>) -> Result<(), SinkError> {
        for record in records {
            self.append(record).await?;
        }
        Ok(())
    }
}

/// Best-effort live broadcast. Fire-and-forget: implementations swallow
/// their own failures.
#[async_trait]
pub trait LivePublisher: Send + Sync {
    async fn publish(&self, record: &Record);
}
