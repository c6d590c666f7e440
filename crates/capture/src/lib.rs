//! Capture Pipeline - two-stage frame ingestion
//!
//! One session owns one dedicated reader thread (single-reader discipline
//! on the capture handle) feeding a fixed-capacity drop-oldest ring, and
//! one decoder thread draining the ring into a stream of `FlowEvent`s.
//! The reader never blocks on a slow decoder: when the ring is full the
//! oldest undecoded frame is evicted and counted.
//!
//! Lifecycle: Idle -> Running -> Stopping -> Closed. `stop` is observed
//! after the current read returns; no event is emitted after Closed.

mod decode;
mod ring;
mod source;

pub use decode::decode_frame;
pub use ring::FrameRing;
pub use source::{list_interfaces, FrameSource, PnetSource};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use netwarden_common::{CaptureConfig, CaptureError, CaptureStats, FlowEvent, SessionState};

/// Capacity of the decoded-event channel to the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consecutive read errors tolerated before the session is closed as fatal.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 8;

/// Session state stored as an atomic so both threads and the handle can
/// observe it without a lock.
struct SessionCell(AtomicU8);

impl SessionCell {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    fn encode(state: SessionState) -> u8 {
        match state {
            SessionState::Idle => 0,
            SessionState::Running => 1,
            SessionState::Stopping => 2,
            SessionState::Closed => 3,
        }
    }

    fn store(&self, state: SessionState) {
        self.0.store(Self::encode(state), Ordering::SeqCst);
    }

    fn load(&self) -> SessionState {
        match self.0.load(Ordering::SeqCst) {
            0 => SessionState::Idle,
            1 => SessionState::Running,
            2 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Default)]
struct SharedCounters {
    frames_read: AtomicU64,
    emitted: AtomicU64,
    undecoded: AtomicU64,
    read_errors: AtomicU64,
}

/// Cloneable stop lever, detachable from the handle so the stream owner
/// and an outside controller can coexist.
#[derive(Clone)]
pub struct SessionStopper {
    stop: Arc<AtomicBool>,
    state: Arc<SessionCell>,
}

impl SessionStopper {
    pub fn stop(&self) {
        if matches!(self.state.load(), SessionState::Running) {
            self.state.store(SessionState::Stopping);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }
}

/// Handle to a running capture session.
pub struct CaptureHandle {
    pub session_id: Uuid,
    events: mpsc::Receiver<FlowEvent>,
    stop: Arc<AtomicBool>,
    state: Arc<SessionCell>,
    counters: Arc<SharedCounters>,
    ring: Arc<FrameRing>,
    reader: Option<std::thread::JoinHandle<()>>,
    decoder: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Next decoded event. `None` once the session has closed.
    pub async fn next(&mut self) -> Option<FlowEvent> {
        self.events.recv().await
    }

    /// Request cooperative shutdown. The reader exits after the current
    /// read returns; the decoder drains the ring, then the session closes.
    pub fn stop(&self) {
        let current = self.state.load();
        if matches!(current, SessionState::Running) {
            self.state.store(SessionState::Stopping);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Detachable stop lever.
    pub fn stopper(&self) -> SessionStopper {
        SessionStopper {
            stop: self.stop.clone(),
            state: self.state.clone(),
        }
    }

    /// Counter snapshot; final once `state() == Closed`.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_read: self.counters.frames_read.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            dropped: self.ring.dropped(),
            undecoded: self.counters.undecoded.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            sink_errors: 0,
        }
    }

    /// Stop, wait for both stages to exit, and return the final counters.
    pub async fn join(mut self) -> CaptureStats {
        self.stop();
        // The events receiver must stay alive while the decoder drains,
        // otherwise its sends fail and events are miscounted as lost.
        let mut events = self.events;
        let reader = self.reader.take();
        let decoder = self.decoder.take();
        let drained = tokio::task::spawn_blocking(move || {
            if let Some(t) = reader {
                let _ = t.join();
            }
            // Unblock the decoder by consuming whatever it still emits.
            while events.blocking_recv().is_some() {}
            if let Some(t) = decoder {
                let _ = t.join();
            }
        });
        if let Err(e) = drained.await {
            warn!("capture join task failed: {e}");
        }
        CaptureStats {
            frames_read: self.counters.frames_read.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            dropped: self.ring.dropped(),
            undecoded: self.counters.undecoded.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            sink_errors: 0,
        }
    }
}

/// Open the configured interface and start a session on it.
pub fn start(config: &CaptureConfig) -> Result<CaptureHandle, CaptureError> {
    let source = PnetSource::open(config)?;
    start_with_source(config, Box::new(source))
}

/// Start a session over an already-open frame source. The seam tests and
/// alternative bindings use.
pub fn start_with_source(
    config: &CaptureConfig,
    source: Box<dyn FrameSource>,
) -> Result<CaptureHandle, CaptureError> {
    let session_id = Uuid::new_v4();
    let stop = Arc::new(AtomicBool::new(false));
    let state = Arc::new(SessionCell::new(SessionState::Idle));
    let counters = Arc::new(SharedCounters::default());
    let ring = Arc::new(FrameRing::new(config.ring_capacity));
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    info!(
        %session_id,
        interface = %config.interface_id,
        snap_len = config.snap_len,
        promiscuous = config.promiscuous,
        "capture session starting"
    );

    let spawn_failed = |stage: &str, e: std::io::Error| CaptureError::Open {
        interface: config.interface_id.clone(),
        reason: format!("cannot spawn {stage} thread: {e}"),
    };

    let reader = {
        let stop = stop.clone();
        let state = state.clone();
        let counters = counters.clone();
        let ring = ring.clone();
        std::thread::Builder::new()
            .name(format!("capture-read-{session_id}"))
            .spawn(move || reader_loop(source, &stop, &state, &counters, &ring))
            .map_err(|e| spawn_failed("reader", e))?
    };

    let decoder_spawn = {
        let state = state.clone();
        let counters = counters.clone();
        let ring = ring.clone();
        std::thread::Builder::new()
            .name(format!("capture-decode-{session_id}"))
            .spawn(move || decoder_loop(&ring, &counters, &state, tx))
    };
    let decoder = match decoder_spawn {
        Ok(thread) => thread,
        Err(e) => {
            // Unwind the already-running reader before reporting.
            stop.store(true, Ordering::SeqCst);
            let _ = reader.join();
            state.store(SessionState::Closed);
            return Err(spawn_failed("decoder", e));
        }
    };

    Ok(CaptureHandle {
        session_id,
        events: rx,
        stop,
        state,
        counters,
        ring,
        reader: Some(reader),
        decoder: Some(decoder),
    })
}

fn reader_loop(
    mut source: Box<dyn FrameSource>,
    stop: &AtomicBool,
    state: &SessionCell,
    counters: &SharedCounters,
    ring: &FrameRing,
) {
    state.store(SessionState::Running);
    let mut consecutive_errors: u32 = 0;
    loop {
        if stop.load(Ordering::SeqCst) {
            state.store(SessionState::Stopping);
            break;
        }
        match source.read_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                counters.frames_read.fetch_add(1, Ordering::Relaxed);
                ring.push(frame);
            }
            Ok(None) => {
                // Timeout tick: the cancellation poll point.
                consecutive_errors = 0;
            }
            Err(e) => {
                counters.read_errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    error!("capture read failing repeatedly, closing session: {e}");
                    state.store(SessionState::Stopping);
                    break;
                }
                warn!("capture read error ({consecutive_errors} consecutive): {e}");
            }
        }
    }
    ring.close();
    debug!("capture reader exiting");
}

fn decoder_loop(
    ring: &FrameRing,
    counters: &SharedCounters,
    state: &SessionCell,
    tx: mpsc::Sender<FlowEvent>,
) {
    while let Some(frame) = ring.pop() {
        match decode_frame(&frame) {
            Some(event) => {
                if tx.blocking_send(event).is_err() {
                    // Consumer gone; the session is being torn down.
                    break;
                }
                counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                counters.undecoded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    state.store(SessionState::Closed);
    debug!("capture decoder exiting");
}

#[cfg(test)]
mod tests {
    use super::decode::testutil::{tcp_frame, udp_frame};
    use super::*;
    use netwarden_common::Protocol;

    /// Scripted source: yields its frames once, then timeout ticks until
    /// the reader is stopped.
    struct MockSource {
        frames: std::vec::IntoIter<Vec<u8>>,
    }

    impl MockSource {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            Self {
                frames: frames.into_iter(),
            }
        }
    }

    impl FrameSource for MockSource {
        fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            match self.frames.next() {
                Some(frame) => Ok(Some(frame)),
                None => {
                    // Behave like a quiet interface.
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }

    /// Source that always fails, for the escalation path.
    struct FailingSource;

    impl FrameSource for FailingSource {
        fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            Err(CaptureError::Read(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device vanished",
            )))
        }
    }

    fn test_config() -> CaptureConfig {
        CaptureConfig::new("mock0").with_ring_capacity(256)
    }

    #[tokio::test]
    async fn hundred_udp_packets_yield_hundred_events() {
        let frames: Vec<Vec<u8>> = (0..100)
            .map(|i| udp_frame([10, 0, 0, 5], [10, 0, 0, 9], 40_000 + i as u16, 53))
            .collect();
        let mut handle =
            start_with_source(&test_config(), Box::new(MockSource::new(frames))).unwrap();

        let mut events = Vec::new();
        for _ in 0..100 {
            let ev = handle.next().await.expect("event");
            events.push(ev);
        }
        assert!(events.iter().all(|e| e.protocol == Protocol::Udp));
        assert!(events.iter().all(|e| e.dst_port == 53));
        assert_eq!(events[0].src_port, 40_000);

        let stats = handle.join().await;
        assert_eq!(stats.frames_read, 100);
        assert_eq!(stats.emitted, 100);
        assert_eq!(stats.dropped, 0);
        assert_eq!(
            stats.emitted + stats.dropped + stats.undecoded,
            stats.frames_read
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_counted_not_fatal() {
        let frames = vec![
            udp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1111, 2222),
            vec![0u8; 6], // junk
            tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 3333, 443),
        ];
        let mut handle =
            start_with_source(&test_config(), Box::new(MockSource::new(frames))).unwrap();

        let first = handle.next().await.unwrap();
        assert_eq!(first.protocol, Protocol::Udp);
        let second = handle.next().await.unwrap();
        assert_eq!(second.protocol, Protocol::Tcp);

        let stats = handle.join().await;
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.undecoded, 1);
    }

    #[tokio::test]
    async fn stop_closes_session_and_no_events_follow() {
        let frames = vec![udp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2)];
        let mut handle =
            start_with_source(&test_config(), Box::new(MockSource::new(frames))).unwrap();
        // An emitted event implies the reader entered its loop.
        assert!(handle.next().await.is_some());
        assert_eq!(handle.state(), SessionState::Running);

        handle.stop();
        // The channel closes once both stages exit; recv drains to None.
        while handle.next().await.is_some() {}
        assert_eq!(handle.state(), SessionState::Closed);
        let stats = handle.join().await;
        assert_eq!(stats.emitted, 1);
    }

    #[tokio::test]
    async fn repeated_read_errors_escalate_to_close() {
        let mut handle = start_with_source(&test_config(), Box::new(FailingSource)).unwrap();
        // No events will ever arrive; the stream just ends.
        assert!(handle.next().await.is_none());
        let stats = handle.join().await;
        assert!(stats.read_errors >= 8);
        assert_eq!(stats.emitted, 0);
    }
}
