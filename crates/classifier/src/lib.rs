//! Classifier - rule-based alerting over scan results and flow events
//!
//! Three rules: watch-listed open ports, per-source flow floods, and
//! port-scan patterns. Rate rules use sliding windows implemented as
//! fixed-capacity rings of timestamps per source; entries older than the
//! window are evicted on each insert, before counting. A crossing raises
//! exactly one alert and re-arms only after the count falls back under the
//! threshold.
//!
//! Per-source state is bounded: a capacity-limited table evicts the
//! least-recently-seen source, so many distinct addresses cannot grow
//! memory without bound.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

use netwarden_common::{Alert, AlertKind, Evidence, FlowEvent, PortResult, PortState};

/// Rule thresholds. Defaults are conservative; operators tune per network.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Ports that raise `SuspiciousPort` when found open.
    pub watch_ports: HashSet<u16>,
    /// Flow events from one source within `flood_window` before `Flood`.
    pub flood_threshold: usize,
    pub flood_window: Duration,
    /// Distinct probed ports from one source within `scan_window` before
    /// `ScanDetected`.
    pub scan_port_threshold: usize,
    pub scan_window: Duration,
    /// Maximum tracked sources; least-recently-seen evicted beyond this.
    pub max_sources: usize,
    /// Evidence records attached to an alert.
    pub evidence_limit: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            watch_ports: [23, 445, 1433, 2323, 3389, 4444, 5900, 31337]
                .into_iter()
                .collect(),
            flood_threshold: 100,
            flood_window: Duration::from_secs(1),
            scan_port_threshold: 15,
            scan_window: Duration::from_secs(10),
            max_sources: 4096,
            evidence_limit: 8,
        }
    }
}

/// Sliding-window state for one source address.
struct SourceState {
    flow_times: VecDeque<Instant>,
    flood_active: bool,
    probes: VecDeque<(u16, Instant)>,
    scan_active: bool,
    recent_flows: VecDeque<FlowEvent>,
    recent_results: VecDeque<PortResult>,
    last_seen: Instant,
}

impl SourceState {
    fn new(now: Instant) -> Self {
        Self {
            flow_times: VecDeque::new(),
            flood_active: false,
            probes: VecDeque::new(),
            scan_active: false,
            recent_flows: VecDeque::new(),
            recent_results: VecDeque::new(),
            last_seen: now,
        }
    }
}

pub struct Classifier {
    cfg: ClassifierConfig,
    sources: HashMap<IpAddr, SourceState>,
}

impl Classifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self {
            cfg,
            sources: HashMap::new(),
        }
    }

    /// Classify one port result. Zero or more alerts.
    pub fn observe_port_result(&mut self, result: &PortResult) -> Vec<Alert> {
        self.observe_port_result_at(result, Instant::now())
    }

    pub fn observe_port_result_at(&mut self, result: &PortResult, now: Instant) -> Vec<Alert> {
        let mut alerts = Vec::new();

        // Watch-list rule: stateless, fires on every watched open port.
        if result.state == PortState::Open && self.cfg.watch_ports.contains(&result.port) {
            debug!(address = %result.address, port = result.port, "watch-listed port open");
            alerts.push(Alert::new(
                AlertKind::SuspiciousPort,
                result.address,
                vec![Evidence::Port(result.clone())],
            ));
        }

        // Scan-pattern rule: distinct open/filtered ports per source window.
        if matches!(result.state, PortState::Open | PortState::Filtered) {
            let evidence_limit = self.cfg.evidence_limit;
            let threshold = self.cfg.scan_port_threshold;
            let window = self.cfg.scan_window;
            let state = self.touch(result.address, now);

            state.probes.push_back((result.port, now));
            while state
                .probes
                .front()
                .is_some_and(|(_, t)| now.duration_since(*t) > window)
            {
                state.probes.pop_front();
            }
            state.recent_results.push_back(result.clone());
            if state.recent_results.len() > evidence_limit {
                state.recent_results.pop_front();
            }

            let distinct: HashSet<u16> = state.probes.iter().map(|(p, _)| *p).collect();
            if distinct.len() > threshold {
                if !state.scan_active {
                    state.scan_active = true;
                    let evidence = state
                        .recent_results
                        .iter()
                        .cloned()
                        .map(Evidence::Port)
                        .collect();
                    alerts.push(Alert::new(AlertKind::ScanDetected, result.address, evidence));
                }
            } else {
                state.scan_active = false;
            }
            self.evict_over_capacity(result.address);
        }

        alerts
    }

    /// Classify one flow event. Zero or more alerts.
    pub fn observe_flow(&mut self, event: &FlowEvent) -> Vec<Alert> {
        self.observe_flow_at(event, Instant::now())
    }

    pub fn observe_flow_at(&mut self, event: &FlowEvent, now: Instant) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let threshold = self.cfg.flood_threshold;
        let window = self.cfg.flood_window;
        let evidence_limit = self.cfg.evidence_limit;
        let ring_capacity = threshold.max(1);

        let state = self.touch(event.src_ip, now);

        // Fixed-capacity timestamp ring; oldest entry gives way on insert.
        if state.flow_times.len() >= ring_capacity {
            state.flow_times.pop_front();
        }
        state.flow_times.push_back(now);
        // Evict entries older than the window width before counting.
        while state
            .flow_times
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            state.flow_times.pop_front();
        }
        state.recent_flows.push_back(event.clone());
        if state.recent_flows.len() > evidence_limit {
            state.recent_flows.pop_front();
        }

        if state.flow_times.len() >= threshold {
            if !state.flood_active {
                state.flood_active = true;
                let evidence = state
                    .recent_flows
                    .iter()
                    .cloned()
                    .map(Evidence::Flow)
                    .collect();
                debug!(source = %event.src_ip, "flood threshold crossed");
                alerts.push(Alert::new(AlertKind::Flood, event.src_ip, evidence));
            }
        } else {
            state.flood_active = false;
        }

        self.evict_over_capacity(event.src_ip);
        alerts
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }

    fn touch(&mut self, source: IpAddr, now: Instant) -> &mut SourceState {
        let state = self
            .sources
            .entry(source)
            .or_insert_with(|| SourceState::new(now));
        state.last_seen = now;
        state
    }

    /// Least-recently-seen eviction, sparing the source just touched.
    fn evict_over_capacity(&mut self, keep: IpAddr) {
        while self.sources.len() > self.cfg.max_sources {
            let oldest = self
                .sources
                .iter()
                .filter(|(ip, _)| **ip != keep)
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(ip, _)| *ip);
            match oldest {
                Some(ip) => {
                    self.sources.remove(&ip);
                }
                None => break,
            }
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
