//! Engine surface - scan/capture orchestration over a shared classifier
//! and an injected sink
//!
//! The engine starts runs, pumps their streams through the classifier,
//! appends every finalized record to the sink, and retains a bounded alert
//! list for `alerts_since`. Scan and capture runs are independent
//! concurrent activities; they share only the classifier and the sink.

mod engine;
mod sinks;

pub use engine::{
    CaptureRunHandle, Engine, EngineConfig, EngineError, ScanRunHandle,
};
pub use sinks::MemorySink;
