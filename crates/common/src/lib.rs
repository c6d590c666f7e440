//! Netwarden Common - shared types and traits
//!
//! This crate provides the value records, collaborator traits, and error
//! taxonomy used across the netwarden engine crates. Records handed to a
//! sink are immutable once produced; everything here is `Send + Sync`
//! friendly and serde-serializable.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{CaptureError, ResolveError, ScanError, SinkError};
pub use traits::{LivePublisher, Record, ResultSink};
pub use types::{
    Alert, AlertKind, CaptureConfig, CaptureStats, Evidence, FlowEvent, InterfaceInfo, PortResult,
    PortState, Protocol, ResolvedTarget, ScanRequest, ScanStats, ScanStatus, SessionState,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
