//! Engine - run orchestration and the classify/sink pump

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use netwarden_capture::{CaptureHandle, FrameSource, SessionStopper};
use netwarden_classifier::{Classifier, ClassifierConfig};
use netwarden_common::{
    Alert, CaptureConfig, CaptureError, CaptureStats, FlowEvent, LivePublisher, PortResult, Record,
    ResolveError, ResultSink, ScanError, ScanRequest, ScanStats, ScanStatus,
};
use netwarden_scan::{Canceller, PortScanner, ScanHandle};

/// Capacity of the per-run stream handed to the caller.
const RUN_STREAM_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    /// Alerts retained for `alerts_since`; oldest evicted beyond this.
    pub alert_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            alert_retention: 10_000,
        }
    }
}

/// Scan and capture orchestrator. Runs are independent concurrent
/// activities sharing only the classifier and the sink.
pub struct Engine {
    sink: Arc<dyn ResultSink>,
    publisher: Option<Arc<dyn LivePublisher>>,
    classifier: Arc<Mutex<Classifier>>,
    alerts: Arc<Mutex<VecDeque<Alert>>>,
    alert_retention: usize,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn ResultSink>,
        publisher: Option<Arc<dyn LivePublisher>>,
    ) -> Self {
        Self {
            sink,
            publisher,
            classifier: Arc::new(Mutex::new(Classifier::new(config.classifier))),
            alerts: Arc::new(Mutex::new(VecDeque::new())),
            alert_retention: config.alert_retention.max(1),
        }
    }

    /// Start a scan run. Validation and resolution errors come back before
    /// any probe is issued.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<ScanRunHandle, EngineError> {
        request
            .validate()
            .map_err(ScanError::InvalidRequest)?;
        let targets = netwarden_resolver::resolve(&request.target_spec, request.max_hosts).await?;

        let mut scanner = PortScanner::new(request.protocol, request.concurrency, request.timeout);
        if let Some(rate) = request.rate_limit {
            scanner = scanner.with_rate_limit(rate);
        }
        let handle = scanner.run(&targets, request.port_range);
        let run_id = handle.run_id;
        let canceller = handle.canceller();

        let (out_tx, out_rx) = mpsc::channel(RUN_STREAM_CAPACITY);
        let pump = tokio::spawn(scan_pump(
            handle,
            out_tx,
            self.sink.clone(),
            self.publisher.clone(),
            self.classifier.clone(),
            self.alerts.clone(),
            self.alert_retention,
        ));

        Ok(ScanRunHandle {
            run_id,
            results: out_rx,
            canceller,
            pump,
        })
    }

    /// Convenience wrapper: start a scan and drain its stream. Streaming
    /// is the canonical model; this simply collects it.
    pub async fn scan_collect(
        &self,
        request: ScanRequest,
    ) -> Result<(Vec<PortResult>, ScanStats, ScanStatus), EngineError> {
        let mut handle = self.start_scan(request).await?;
        let mut results = Vec::new();
        while let Some(result) = handle.next().await {
            results.push(result);
        }
        let (stats, status) = handle.wait().await;
        Ok((results, stats, status))
    }

    /// Start a capture session on a real interface.
    pub fn start_capture(&self, config: &CaptureConfig) -> Result<CaptureRunHandle, EngineError> {
        let handle = netwarden_capture::start(config)?;
        Ok(self.attach_capture(handle))
    }

    /// Start a capture session over an injected frame source. The seam for
    /// tests and alternative bindings.
    pub fn start_capture_with_source(
        &self,
        config: &CaptureConfig,
        source: Box<dyn FrameSource>,
    ) -> Result<CaptureRunHandle, EngineError> {
        let handle = netwarden_capture::start_with_source(config, source)?;
        Ok(self.attach_capture(handle))
    }

    fn attach_capture(&self, handle: CaptureHandle) -> CaptureRunHandle {
        let session_id = handle.session_id;
        let stopper = handle.stopper();
        let (out_tx, out_rx) = mpsc::channel(RUN_STREAM_CAPACITY);
        let pump = tokio::spawn(capture_pump(
            handle,
            out_tx,
            self.sink.clone(),
            self.publisher.clone(),
            self.classifier.clone(),
            self.alerts.clone(),
            self.alert_retention,
        ));
        CaptureRunHandle {
            session_id,
            events: out_rx,
            stopper,
            pump,
        }
    }

    /// Alerts raised at or after `since`, oldest first.
    pub async fn alerts_since(&self, since: SystemTime) -> Vec<Alert> {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| a.raised_at >= since)
            .cloned()
            .collect()
    }
}

/// Handle to a running scan: the caller-facing stream plus control levers.
#[derive(Debug)]
pub struct ScanRunHandle {
    pub run_id: Uuid,
    results: mpsc::Receiver<PortResult>,
    canceller: Canceller,
    pump: JoinHandle<(ScanStats, ScanStatus)>,
}

impl ScanRunHandle {
    pub async fn next(&mut self) -> Option<PortResult> {
        self.results.recv().await
    }

    pub fn stop(&self) {
        self.canceller.cancel();
    }

    /// Wait for the run to finish. Drops the caller stream first so the
    /// pump can drain out.
    pub async fn wait(self) -> (ScanStats, ScanStatus) {
        drop(self.results);
        match self.pump.await {
            Ok(outcome) => outcome,
            Err(e) => (
                ScanStats::default(),
                ScanStatus::Failed(format!("pump task panicked: {e}")),
            ),
        }
    }
}

/// Handle to a running capture session.
pub struct CaptureRunHandle {
    pub session_id: Uuid,
    events: mpsc::Receiver<FlowEvent>,
    stopper: SessionStopper,
    pump: JoinHandle<CaptureStats>,
}

impl CaptureRunHandle {
    pub async fn next(&mut self) -> Option<FlowEvent> {
        self.events.recv().await
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Detachable stop lever.
    pub fn stopper(&self) -> SessionStopper {
        self.stopper.clone()
    }

    pub async fn wait(self) -> CaptureStats {
        self.stopper.stop();
        drop(self.events);
        match self.pump.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("capture pump panicked: {e}");
                CaptureStats::default()
            }
        }
    }
}

async fn scan_pump(
    mut handle: ScanHandle,
    out_tx: mpsc::Sender<PortResult>,
    sink: Arc<dyn ResultSink>,
    publisher: Option<Arc<dyn LivePublisher>>,
    classifier: Arc<Mutex<Classifier>>,
    alerts: Arc<Mutex<VecDeque<Alert>>>,
    alert_retention: usize,
) -> (ScanStats, ScanStatus) {
    let mut stats = ScanStats::new(handle.total_probes());
    let mut caller_gone = false;

    while let Some(result) = handle.next().await {
        stats.record(&result);

        let raised = classifier.lock().await.observe_port_result(&result);
        append_record(&sink, &publisher, Record::Port(result.clone()), &mut stats.sink_errors).await;
        for alert in raised {
            retain_alert(&alerts, alert_retention, alert.clone()).await;
            append_record(&sink, &publisher, Record::Alert(alert), &mut stats.sink_errors).await;
        }

        if !caller_gone && out_tx.send(result).await.is_err() {
            caller_gone = true;
        }
    }

    let status = handle.wait().await;
    info!(completed = stats.completed, open = stats.open, %status, "scan run finished");
    (stats, status)
}

async fn capture_pump(
    mut handle: CaptureHandle,
    out_tx: mpsc::Sender<FlowEvent>,
    sink: Arc<dyn ResultSink>,
    publisher: Option<Arc<dyn LivePublisher>>,
    classifier: Arc<Mutex<Classifier>>,
    alerts: Arc<Mutex<VecDeque<Alert>>>,
    alert_retention: usize,
) -> CaptureStats {
    let mut sink_errors: u64 = 0;
    let mut caller_gone = false;

    while let Some(event) = handle.next().await {
        let raised = classifier.lock().await.observe_flow(&event);
        append_record_u64(&sink, &publisher, Record::Flow(event.clone()), &mut sink_errors).await;
        for alert in raised {
            retain_alert(&alerts, alert_retention, alert.clone()).await;
            append_record_u64(&sink, &publisher, Record::Alert(alert), &mut sink_errors).await;
        }

        if !caller_gone && out_tx.send(event).await.is_err() {
            caller_gone = true;
        }
    }

    let mut stats = handle.join().await;
    stats.sink_errors = sink_errors;
    info!(
        frames = stats.frames_read,
        emitted = stats.emitted,
        dropped = stats.dropped,
        "capture session finished"
    );
    stats
}

async fn append_record(
    sink: &Arc<dyn ResultSink>,
    publisher: &Option<Arc<dyn LivePublisher>>,
    record: Record,
    sink_errors: &mut usize,
) {
    if let Some(publisher) = publisher {
        publisher.publish(&record).await;
    }
    if let Err(e) = sink.append(record).await {
        *sink_errors += 1;
        warn!("sink append failed: {e}");
    }
}

async fn append_record_u64(
    sink: &Arc<dyn ResultSink>,
    publisher: &Option<Arc<dyn LivePublisher>>,
    record: Record,
    sink_errors: &mut u64,
) {
    let mut count = 0usize;
    append_record(sink, publisher, record, &mut count).await;
    *sink_errors += count as u64;
}

async fn retain_alert(alerts: &Arc<Mutex<VecDeque<Alert>>>, retention: usize, alert: Alert) {
    let mut alerts = alerts.lock().await;
    alerts.push_back(alert);
    while alerts.len() > retention {
        alerts.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use netwarden_common::{PortState, Protocol};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn engine_with_sink() -> (Engine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::new(EngineConfig::default(), sink.clone(), None);
        (engine, sink)
    }

    async fn free_port_range(len: u16) -> (u16, u16) {
        // Grab one free port and assume the next few above it are also
        // unbound; fine for loopback tests.
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let low = l.local_addr().unwrap().port();
        drop(l);
        (low, low + len - 1)
    }

    #[tokio::test]
    async fn scan_collect_closed_range() {
        let (engine, sink) = engine_with_sink();
        let (low, high) = free_port_range(6).await;

        let request = ScanRequest::new("127.0.0.1", (low, high))
            .with_concurrency(4)
            .with_timeout(Duration::from_millis(200));
        let (results, stats, status) = engine.scan_collect(request).await.unwrap();

        assert_eq!(status, ScanStatus::Completed);
        assert_eq!(results.len(), 6);
        assert!(results
            .iter()
            .all(|r| matches!(r.state, PortState::Closed | PortState::Filtered)));
        assert_eq!(stats.completed, 6);
        assert_eq!(stats.open, 0);
        // Every result reached the sink.
        let ports = sink
            .records()
            .await
            .into_iter()
            .filter(|r| matches!(r, Record::Port(_)))
            .count();
        assert_eq!(ports, 6);
    }

    #[tokio::test]
    async fn invalid_request_rejected_before_start() {
        let (engine, sink) = engine_with_sink();
        let request = ScanRequest::new("127.0.0.1", (25, 20));
        let err = engine.start_scan(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Scan(ScanError::InvalidRequest(_))));
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn oversized_expansion_rejected_before_start() {
        let (engine, sink) = engine_with_sink();
        let mut request = ScanRequest::new("10.0.0.0/8", (80, 80));
        request.max_hosts = 1024;
        let err = engine.start_scan(request).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Resolve(ResolveError::TooManyHosts { .. })
        ));
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn watched_open_port_raises_alert() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let sink = Arc::new(MemorySink::new());
        let mut config = EngineConfig::default();
        config.classifier.watch_ports = [port].into_iter().collect();
        let engine = Engine::new(config, sink.clone(), None);

        let started = SystemTime::now();
        let request = ScanRequest::new("127.0.0.1", (port, port))
            .with_timeout(Duration::from_millis(500));
        let (results, _, status) = engine.scan_collect(request).await.unwrap();
        assert_eq!(status, ScanStatus::Completed);
        assert_eq!(results[0].state, PortState::Open);

        let alerts = engine.alerts_since(started).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, netwarden_common::AlertKind::SuspiciousPort);

        let alert_records = sink
            .records()
            .await
            .into_iter()
            .filter(|r| matches!(r, Record::Alert(_)))
            .count();
        assert_eq!(alert_records, 1);
    }

    /// Minimal Ethernet+IPv4+UDP frame for the capture pump test.
    fn udp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
        let payload = b"x";
        let udp_len = 8 + payload.len() as u16;
        let total_len = 20 + udp_len;
        let mut f = Vec::new();
        f.extend_from_slice(&[0xff; 6]);
        f.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        f.extend_from_slice(&0x0800u16.to_be_bytes());
        f.push(0x45);
        f.push(0);
        f.extend_from_slice(&total_len.to_be_bytes());
        f.extend_from_slice(&[0, 0, 0x40, 0]);
        f.push(64);
        f.push(17);
        f.extend_from_slice(&[0, 0]);
        f.extend_from_slice(&src);
        f.extend_from_slice(&dst);
        f.extend_from_slice(&src_port.to_be_bytes());
        f.extend_from_slice(&dst_port.to_be_bytes());
        f.extend_from_slice(&udp_len.to_be_bytes());
        f.extend_from_slice(&[0, 0]);
        f.extend_from_slice(payload);
        f
    }

    struct ScriptedSource {
        frames: std::vec::IntoIter<Vec<u8>>,
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            match self.frames.next() {
                Some(frame) => Ok(Some(frame)),
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }

    #[tokio::test]
    async fn capture_pump_classifies_and_sinks_flows() {
        let sink = Arc::new(MemorySink::new());
        let mut config = EngineConfig::default();
        config.classifier.flood_threshold = 50;
        config.classifier.flood_window = Duration::from_secs(5);
        let engine = Engine::new(config, sink.clone(), None);

        let started = SystemTime::now();
        let frames: Vec<Vec<u8>> = (0..100)
            .map(|_| udp_frame([10, 0, 0, 8], [10, 0, 0, 1], 55_000, 53))
            .collect();
        let capture_config = CaptureConfig::new("mock0");
        let mut handle = engine
            .start_capture_with_source(
                &capture_config,
                Box::new(ScriptedSource {
                    frames: frames.into_iter(),
                }),
            )
            .unwrap();

        for _ in 0..100 {
            assert!(handle.next().await.is_some());
        }
        let stats = handle.wait().await;
        assert_eq!(stats.emitted, 100);
        assert_eq!(stats.sink_errors, 0);

        // One flood crossing, not one alert per packet.
        let alerts = engine.alerts_since(started).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, netwarden_common::AlertKind::Flood);

        let flows = sink
            .records()
            .await
            .into_iter()
            .filter(|r| matches!(r, Record::Flow(_)))
            .count();
        assert_eq!(flows, 100);
    }

    #[tokio::test]
    async fn failing_sink_never_aborts_the_run() {
        struct FailingSink;

        #[async_trait::async_trait]
        impl ResultSink for FailingSink {
            async fn append(&self, _record: Record) -> Result<(), netwarden_common::SinkError> {
                Err(netwarden_common::SinkError("disk full".into()))
            }
        }

        let engine = Engine::new(EngineConfig::default(), Arc::new(FailingSink), None);
        let (low, high) = free_port_range(3).await;
        let request = ScanRequest::new("127.0.0.1", (low, high))
            .with_timeout(Duration::from_millis(200));
        let (results, stats, status) = engine.scan_collect(request).await.unwrap();
        assert_eq!(status, ScanStatus::Completed);
        assert_eq!(results.len(), 3);
        assert_eq!(stats.sink_errors, 3);
    }
}
