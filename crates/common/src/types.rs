//! Core data types for the netwarden engine
//!
//! Value records are intentionally plain: public fields, cheap clones,
//! immutable once handed to a sink. `SystemTime` is used on serialized
//! records; internal window arithmetic uses `Instant` and never leaves the
//! producing crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Supported probe protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port states produced by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
        };
        f.write_str(s)
    }
}

/// A concrete scan target produced by the resolver. Expansion is bounded,
/// deduplicated, and ordered ascending by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub address: IpAddr,
}

impl ResolvedTarget {
    #[inline]
    #[must_use]
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// One scan run request. Validated before any engine starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub target_spec: String,
    pub port_range: (u16, u16),
    pub protocol: Protocol,
    pub concurrency: usize,
    pub timeout: Duration,
    /// Probes per second across the whole worker pool. `None` = unlimited.
    pub rate_limit: Option<u32>,
    /// Upper bound on target expansion; requests beyond it are rejected
    /// before any network action.
    pub max_hosts: usize,
}

impl ScanRequest {
    #[must_use]
    pub fn new(target_spec: impl Into<String>, port_range: (u16, u16)) -> Self {
        Self {
            target_spec: target_spec.into(),
            port_range,
            protocol: Protocol::Tcp,
            concurrency: 64,
            timeout: Duration::from_millis(800),
            rate_limit: None,
            max_hosts: 65_536,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rate_limit(mut self, rate: u32) -> Self {
        self.rate_limit = Some(rate);
        self
    }

    /// Structural validation. Target spec syntax is the resolver's job.
    pub fn validate(&self) -> Result<(), String> {
        if self.port_range.0 > self.port_range.1 {
            return Err(format!(
                "port range {}-{} is inverted",
                self.port_range.0, self.port_range.1
            ));
        }
        if self.concurrency == 0 {
            return Err("concurrency must be >= 1".into());
        }
        if self.timeout.is_zero() {
            return Err("probe timeout must be non-zero".into());
        }
        Ok(())
    }

    /// Number of ports covered by the range (inclusive).
    #[inline]
    #[must_use]
    pub fn port_count(&self) -> usize {
        (self.port_range.1 - self.port_range.0) as usize + 1
    }
}

/// Result of probing a single (address, port) pair. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResult {
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    /// Diagnostic tag for probes downgraded to `Filtered` on error.
    pub diagnostic: Option<String>,
    pub probed_at: SystemTime,
}

impl PortResult {
    #[inline]
    #[must_use]
    pub fn new(address: IpAddr, port: u16, protocol: Protocol, state: PortState) -> Self {
        Self {
            address,
            port,
            protocol,
            state,
            service: None,
            diagnostic: None,
            probed_at: SystemTime::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, PortState::Open)
    }
}

impl fmt::Display for PortResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} {}",
            self.address,
            self.port,
            self.protocol.as_str(),
            self.state
        )
    }
}

/// Capture session parameters, fixed at session start. Changing snaplen or
/// the promiscuous flag requires a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub interface_id: String,
    pub snap_len: usize,
    pub promiscuous: bool,
    pub read_timeout: Duration,
    /// Capacity of the raw-frame ring between the reader and the decoder.
    pub ring_capacity: usize,
}

impl CaptureConfig {
    #[must_use]
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            snap_len: 65_536,
            promiscuous: true,
            read_timeout: Duration::from_millis(10),
            ring_capacity: 1024,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_snap_len(mut self, snap_len: usize) -> Self {
        self.snap_len = snap_len;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ring_capacity(mut self, ring_capacity: usize) -> Self {
        self.ring_capacity = ring_capacity;
        self
    }
}

/// Capture session lifecycle. Owned exclusively by the capture pipeline;
/// no `FlowEvent` is emitted after `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Closed,
}

/// One decoded frame. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
    pub length: usize,
    pub captured_at: SystemTime,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} {} ({} bytes)",
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.protocol.as_str(),
            self.length
        )
    }
}

/// Alert categories raised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    SuspiciousPort,
    Flood,
    ScanDetected,
}

impl AlertKind {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SuspiciousPort => "suspicious_port",
            AlertKind::Flood => "flood",
            AlertKind::ScanDetected => "scan_detected",
        }
    }
}

/// Evidence attached to an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Evidence {
    Port(PortResult),
    Flow(FlowEvent),
}

/// Classifier verdict. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub subject: IpAddr,
    pub evidence: Vec<Evidence>,
    pub raised_at: SystemTime,
}

impl Alert {
    #[must_use]
    pub fn new(kind: AlertKind, subject: IpAddr, evidence: Vec<Evidence>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            subject,
            evidence,
            raised_at: SystemTime::now(),
        }
    }
}

/// Terminal status of a scan or capture run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Completed,
    Cancelled,
    Failed(String),
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Completed => f.write_str("completed"),
            ScanStatus::Cancelled => f.write_str("cancelled"),
            ScanStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Scan run counters, updated incrementally by the consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_probes: usize,
    pub completed: usize,
    pub open: usize,
    pub closed: usize,
    pub filtered: usize,
    pub probe_errors: usize,
    pub sink_errors: usize,
}

impl ScanStats {
    #[must_use]
    pub fn new(total_probes: usize) -> Self {
        Self {
            total_probes,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &PortResult) {
        self.completed = self.completed.saturating_add(1);
        match result.state {
            PortState::Open => self.open += 1,
            PortState::Closed => self.closed += 1,
            PortState::Filtered => self.filtered += 1,
        }
        if result.diagnostic.is_some() {
            self.probe_errors += 1;
        }
    }

    /// Progress percentage in [0.0, 100.0].
    #[inline]
    #[must_use]
    pub fn progress(&self) -> f32 {
        if self.total_probes == 0 {
            0.0
        } else {
            (self.completed as f32 / self.total_probes as f32) * 100.0
        }
    }
}

/// Capture run counters. Invariant at close:
/// `emitted + dropped + undecoded == frames_read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub emitted: u64,
    /// Frames evicted from the ring because decode fell behind.
    pub dropped: u64,
    /// Frames read but not decodable into a flow (malformed or non-TCP/UDP).
    pub undecoded: u64,
    pub read_errors: u64,
    pub sink_errors: u64,
}

/// Network interface description for capture selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn request_validation() {
        let ok = ScanRequest::new("127.0.0.1", (20, 25));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.port_count(), 6);

        let inverted = ScanRequest::new("127.0.0.1", (25, 20));
        assert!(inverted.validate().is_err());

        let zero_workers = ScanRequest::new("127.0.0.1", (1, 1)).with_concurrency(0);
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn port_result_builders() {
        let r = PortResult::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            22,
            Protocol::Tcp,
            PortState::Open,
        )
        .with_service("ssh");
        assert!(r.is_open());
        assert_eq!(r.service.as_deref(), Some("ssh"));
        assert!(r.diagnostic.is_none());
    }

    #[test]
    fn scan_stats_record() {
        let mut stats = ScanStats::new(4);
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        stats.record(&PortResult::new(addr, 80, Protocol::Tcp, PortState::Open));
        stats.record(&PortResult::new(addr, 81, Protocol::Tcp, PortState::Closed));
        stats.record(
            &PortResult::new(addr, 82, Protocol::Tcp, PortState::Filtered)
                .with_diagnostic("connect: network unreachable"),
        );
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.probe_errors, 1);
        assert!(stats.progress() > 74.0 && stats.progress() < 76.0);
    }

    #[test]
    fn status_display() {
        assert_eq!(ScanStatus::Completed.to_string(), "completed");
        assert_eq!(
            ScanStatus::Failed("socket exhausted".into()).to_string(),
            "failed: socket exhausted"
        );
    }
}
