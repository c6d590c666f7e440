//! Frame source seam over the OS capture facility
//!
//! The pipeline only sees `FrameSource`; the pnet datalink binding lives
//! behind it, so tests feed synthetic frames and a future FFI binding can
//! slot in without touching the pipeline.

use pnet::datalink::{self, Channel, Config, DataLinkReceiver};
use std::io::ErrorKind;
use std::time::Duration;

use netwarden_common::{CaptureConfig, CaptureError, InterfaceInfo};

/// Blocking single-reader frame source. Called only from the dedicated
/// reader thread; capture handles are not shared across readers.
pub trait FrameSource: Send {
    /// Read the next frame. `Ok(None)` is a timeout tick, which the reader
    /// uses as its cancellation poll point.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// pnet datalink-backed source.
pub struct PnetSource {
    rx: Box<dyn DataLinkReceiver>,
}

impl PnetSource {
    /// Open a capture channel on the configured interface. Snap length and
    /// the promiscuous flag are fixed for the life of the channel.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == config.interface_id)
            .ok_or_else(|| CaptureError::Open {
                interface: config.interface_id.clone(),
                reason: "no such interface".into(),
            })?;

        let datalink_config = Config {
            read_timeout: Some(read_timeout(config.read_timeout)),
            read_buffer_size: config.snap_len.max(4096),
            promiscuous: config.promiscuous,
            ..Config::default()
        };

        match datalink::channel(&interface, datalink_config) {
            Ok(Channel::Ethernet(_tx, rx)) => Ok(Self { rx }),
            Ok(_) => Err(CaptureError::Unsupported(
                "non-ethernet channel type".into(),
            )),
            Err(e) => Err(CaptureError::Open {
                interface: config.interface_id.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A zero read timeout would block the reader forever and defeat
/// cooperative shutdown.
fn read_timeout(configured: Duration) -> Duration {
    if configured.is_zero() {
        Duration::from_millis(10)
    } else {
        configured
    }
}

impl FrameSource for PnetSource {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }
}

/// Enumerate capture-capable interfaces for session selection.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| InterfaceInfo {
            id: iface.name.clone(),
            name: iface.name,
            description: if iface.description.is_empty() {
                iface
                    .ips
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                iface.description
            },
        })
        .collect()
}
