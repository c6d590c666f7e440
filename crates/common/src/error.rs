//! Error taxonomy for the netwarden engine
//!
//! Per-item failures (one probe, one frame) are downgraded and counted by
//! the producing component; the variants here are the errors that cross a
//! crate boundary.

use std::io;
use thiserror::Error;

/// Target resolution failures. All returned synchronously, before any
/// network action is taken on the targets.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid target spec '{0}'")]
    InvalidTarget(String),

    #[error("name resolution failed for '{0}'")]
    Resolution(String),

    #[error("target spec '{spec}' expands to {hosts} hosts, limit is {max_hosts}")]
    TooManyHosts {
        spec: String,
        hosts: u128,
        max_hosts: usize,
    },
}

/// Fatal scan engine failures. Individual probe errors never surface here;
/// they are recorded as filtered results with a diagnostic tag.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("scan engine failure: {0}")]
    EngineFailure(String),
}

/// Capture pipeline failures.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture on '{interface}': {reason}")]
    Open { interface: String, reason: String },

    #[error("capture read error: {0}")]
    Read(#[from] io::Error),

    #[error("capture session already closed")]
    Closed,

    #[error("capture not supported: {0}")]
    Unsupported(String),
}

/// Sink append failure. Always non-fatal to the producing engine; callers
/// log and count it.
#[derive(Error, Debug)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ResolveError::TooManyHosts {
            spec: "10.0.0.0/8".into(),
            hosts: 16_777_216,
            max_hosts: 65_536,
        };
        let msg = e.to_string();
        assert!(msg.contains("10.0.0.0/8"));
        assert!(msg.contains("65536"));
    }

    #[test]
    fn sink_error_is_send_sync() {
        fn assert_bounds<T: Send + Sync + 'static>() {}
        assert_bounds::<SinkError>();
        assert_bounds::<CaptureError>();
        assert_bounds::<ScanError>();
        assert_bounds::<ResolveError>();
    }
}
