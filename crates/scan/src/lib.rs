//! Port Scan Engine - bounded worker-pool probing
//!
//! A fixed pool of `concurrency` workers pulls `(address, port)` pairs from
//! a lazy cursor over the cartesian product of targets and the port range;
//! the product is never materialized. Results flow through a bounded
//! channel, so a slow consumer backpressures the workers instead of
//! buffering unboundedly. Cancellation is cooperative: the flag is checked
//! at every iteration boundary and in-flight probes end at their own
//! timeout.

mod prober;
mod rate;
mod services;

pub use prober::{probe, ProbeOutcome};
pub use rate::RateLimiter;
pub use services::service_name;

use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use netwarden_common::{PortResult, Protocol, ResolvedTarget, ScanStatus};

/// Capacity of the result channel between workers and the consumer.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Lazy cursor over targets x ports. Workers pop one pair at a time under a
/// short-lived lock; nothing is ever materialized.
struct WorkCursor {
    targets: Vec<IpAddr>,
    low: u16,
    high: u16,
    pos: Mutex<Option<(usize, u16)>>,
}

impl WorkCursor {
    fn new(targets: Vec<IpAddr>, low: u16, high: u16) -> Self {
        let start = if targets.is_empty() { None } else { Some((0, low)) };
        Self {
            targets,
            low,
            high,
            pos: Mutex::new(start),
        }
    }

    fn next_item(&self) -> Option<(IpAddr, u16)> {
        let mut pos = self.pos.lock();
        let (idx, port) = (*pos)?;
        let item = (self.targets[idx], port);
        *pos = if port < self.high {
            Some((idx, port + 1))
        } else if idx + 1 < self.targets.len() {
            Some((idx + 1, self.low))
        } else {
            None
        };
        Some(item)
    }

    fn total(&self) -> usize {
        self.targets.len() * ((self.high - self.low) as usize + 1)
    }
}

/// In-flight probe instrumentation: a live count plus a high-watermark so
/// the concurrency ceiling is testable.
#[derive(Default)]
pub struct InFlightGauge {
    active: AtomicUsize,
    high_water: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Cloneable cancellation lever, detachable from the handle so an owner of
/// the result stream and an outside controller can coexist.
#[derive(Clone, Debug)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running scan: a result stream, a cancellation lever, and a
/// terminal status.
pub struct ScanHandle {
    pub run_id: Uuid,
    results: mpsc::Receiver<PortResult>,
    cancel: Arc<AtomicBool>,
    driver: JoinHandle<ScanStatus>,
    gauge: Arc<InFlightGauge>,
    total_probes: usize,
}

impl ScanHandle {
    /// Next result, in completion order. `None` once the run is over.
    pub async fn next(&mut self) -> Option<PortResult> {
        self.results.recv().await
    }

    /// Request cooperative cancellation. No new probes start once observed;
    /// results already produced remain valid.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Detachable cancellation lever.
    pub fn canceller(&self) -> Canceller {
        Canceller(self.cancel.clone())
    }

    /// Wait for the run to finish and return its terminal status. Drops the
    /// result stream first so blocked workers can drain out.
    pub async fn wait(self) -> ScanStatus {
        drop(self.results);
        match self.driver.await {
            Ok(status) => status,
            Err(e) => ScanStatus::Failed(format!("scan driver panicked: {e}")),
        }
    }

    pub fn gauge(&self) -> &Arc<InFlightGauge> {
        &self.gauge
    }

    pub fn total_probes(&self) -> usize {
        self.total_probes
    }
}

/// Port scanner configuration. One instance drives one run.
pub struct PortScanner {
    protocol: Protocol,
    concurrency: usize,
    timeout: Duration,
    rate: Option<Arc<RateLimiter>>,
}

impl PortScanner {
    pub fn new(protocol: Protocol, concurrency: usize, timeout: Duration) -> Self {
        Self {
            protocol,
            concurrency: concurrency.max(1),
            timeout,
            rate: None,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, probes_per_second: u32) -> Self {
        self.rate = Some(Arc::new(RateLimiter::new(probes_per_second)));
        self
    }

    /// Start the scan. Results are emitted in completion order, not
    /// submission order.
    pub fn run(&self, targets: &[ResolvedTarget], port_range: (u16, u16)) -> ScanHandle {
        let run_id = Uuid::new_v4();
        let addresses: Vec<IpAddr> = targets.iter().map(|t| t.address).collect();
        let cursor = Arc::new(WorkCursor::new(addresses, port_range.0, port_range.1));
        let total_probes = cursor.total();
        let cancel = Arc::new(AtomicBool::new(false));
        let gauge = Arc::new(InFlightGauge::default());
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        // First engine-level failure wins; it also cancels the run.
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        info!(
            %run_id,
            targets = targets.len(),
            ports = (port_range.1 - port_range.0) as usize + 1,
            concurrency = self.concurrency,
            protocol = %self.protocol,
            "starting scan"
        );

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                cursor.clone(),
                self.protocol,
                self.timeout,
                tx.clone(),
                cancel.clone(),
                gauge.clone(),
                self.rate.clone(),
                failure.clone(),
            )));
        }
        drop(tx);

        let driver_cancel = cancel.clone();
        let driver = tokio::spawn(async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!("scan worker panicked: {e}");
                }
            }
            if let Some(reason) = failure.lock().take() {
                ScanStatus::Failed(reason)
            } else if driver_cancel.load(Ordering::SeqCst) {
                ScanStatus::Cancelled
            } else {
                ScanStatus::Completed
            }
        });

        ScanHandle {
            run_id,
            results: rx,
            cancel,
            driver,
            gauge,
            total_probes,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    cursor: Arc<WorkCursor>,
    protocol: Protocol,
    timeout: Duration,
    tx: mpsc::Sender<PortResult>,
    cancel: Arc<AtomicBool>,
    gauge: Arc<InFlightGauge>,
    rate: Option<Arc<RateLimiter>>,
    failure: Arc<Mutex<Option<String>>>,
) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let Some((address, port)) = cursor.next_item() else {
            break;
        };
        if let Some(limiter) = &rate {
            limiter.acquire().await;
        }

        gauge.enter();
        let outcome = probe(protocol, address, port, timeout).await;
        gauge.exit();

        match outcome {
            ProbeOutcome::Result(mut result) => {
                if let Some(name) = service_name(port, protocol) {
                    result.service = Some(name.to_string());
                }
                // A closed consumer means the run is being torn down.
                if tx.send(result).await.is_err() {
                    break;
                }
            }
            ProbeOutcome::EngineFailure(reason) => {
                warn!(worker_id, %reason, "engine failure, halting run");
                let mut slot = failure.lock();
                if slot.is_none() {
                    *slot = Some(reason);
                }
                cancel.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
    debug!(worker_id, "scan worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwarden_common::PortState;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn loopback_targets() -> Vec<ResolvedTarget> {
        vec![ResolvedTarget::new(IpAddr::V4(Ipv4Addr::LOCALHOST))]
    }

    async fn drain(mut handle: ScanHandle) -> (Vec<PortResult>, ScanStatus) {
        let mut results = Vec::new();
        while let Some(r) = handle.next().await {
            results.push(r);
        }
        let status = handle.wait().await;
        (results, status)
    }

    #[test]
    fn cursor_walks_full_product_once() {
        let cursor = WorkCursor::new(
            vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ],
            80,
            82,
        );
        assert_eq!(cursor.total(), 6);
        let mut items = Vec::new();
        while let Some(item) = cursor.next_item() {
            items.push(item);
        }
        assert_eq!(items.len(), 6);
        assert_eq!(items[0], (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 80));
        assert_eq!(items[5], (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 82));
    }

    #[test]
    fn cursor_handles_empty_targets() {
        let cursor = WorkCursor::new(Vec::new(), 1, 10);
        assert_eq!(cursor.total(), 0);
        assert!(cursor.next_item().is_none());
    }

    #[tokio::test]
    async fn open_port_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep accepting so connects complete.
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let scanner = PortScanner::new(Protocol::Tcp, 2, Duration::from_millis(500));
        let handle = scanner.run(&loopback_targets(), (port, port));
        let (results, status) = drain(handle).await;
        assert_eq!(status, ScanStatus::Completed);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, PortState::Open);
    }

    #[tokio::test]
    async fn closed_port_is_idempotent() {
        // Grab a port the OS considers free, then release it.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        for _ in 0..3 {
            let scanner = PortScanner::new(Protocol::Tcp, 1, Duration::from_millis(500));
            let handle = scanner.run(&loopback_targets(), (port, port));
            let (results, status) = drain(handle).await;
            assert_eq!(status, ScanStatus::Completed);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].state, PortState::Closed);
        }
    }

    #[tokio::test]
    async fn concurrency_ceiling_respected() {
        let scanner = PortScanner::new(Protocol::Tcp, 4, Duration::from_millis(200));
        let handle = scanner.run(&loopback_targets(), (40_000, 40_063));
        let gauge = handle.gauge().clone();
        let (results, status) = drain(handle).await;
        assert_eq!(status, ScanStatus::Completed);
        assert_eq!(results.len(), 64);
        assert!(gauge.high_water() <= 4, "in-flight peaked at {}", gauge.high_water());
        assert_eq!(gauge.active(), 0);
    }

    #[tokio::test]
    async fn cancellation_yields_subset_and_stops_new_probes() {
        let scanner = PortScanner::new(Protocol::Tcp, 2, Duration::from_millis(200));
        let mut handle = scanner.run(&loopback_targets(), (40_000, 41_000));
        let total = handle.total_probes();

        // Take a few results, then cancel.
        let mut results = Vec::new();
        for _ in 0..4 {
            if let Some(r) = handle.next().await {
                results.push(r);
            }
        }
        handle.cancel();
        while let Some(r) = handle.next().await {
            results.push(r);
        }
        let status = handle.wait().await;
        assert_eq!(status, ScanStatus::Cancelled);
        assert!(results.len() < total, "expected a strict subset after cancel");
    }

    #[tokio::test]
    async fn results_are_tagged_with_service_names() {
        let scanner = PortScanner::new(Protocol::Tcp, 1, Duration::from_millis(200));
        let handle = scanner.run(&loopback_targets(), (22, 22));
        let (results, _) = drain(handle).await;
        assert_eq!(results[0].service.as_deref(), Some("ssh"));
    }
}
