//! Probe primitives
//!
//! One probe is a single connection attempt against one (address, port)
//! pair with a hard deadline. Probe-level network errors never abort a
//! run; they downgrade to `Filtered` with a diagnostic tag. Only a failure
//! to allocate local resources escalates to an engine failure.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::trace;

use netwarden_common::{PortResult, PortState, Protocol};

/// Probe outcome: a result to emit, or a fatal engine condition.
pub enum ProbeOutcome {
    Result(PortResult),
    EngineFailure(String),
}

/// Probe one (address, port) pair with the given deadline.
pub async fn probe(
    protocol: Protocol,
    address: std::net::IpAddr,
    port: u16,
    deadline: Duration,
) -> ProbeOutcome {
    let addr = SocketAddr::new(address, port);
    match protocol {
        Protocol::Tcp => probe_tcp(addr, deadline).await,
        Protocol::Udp => probe_udp(addr, deadline).await,
    }
}

/// TCP connect probe. Connection established means open; an explicit
/// refusal or reset means closed; silence until the deadline means
/// filtered.
async fn probe_tcp(addr: SocketAddr, deadline: Duration) -> ProbeOutcome {
    let state = match timeout(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(e)) => match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => PortState::Closed,
            ErrorKind::TimedOut => PortState::Filtered,
            ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
                return ProbeOutcome::EngineFailure(format!(
                    "cannot allocate local socket: {e}"
                ));
            }
            _ => {
                trace!(%addr, error = %e, "probe error downgraded to filtered");
                return ProbeOutcome::Result(
                    PortResult::new(addr.ip(), addr.port(), Protocol::Tcp, PortState::Filtered)
                        .with_diagnostic(e.to_string()),
                );
            }
        },
        Err(_) => PortState::Filtered,
    };
    ProbeOutcome::Result(PortResult::new(
        addr.ip(),
        addr.port(),
        Protocol::Tcp,
        state,
    ))
}

/// UDP probe. A datagram is sent and a reply awaited: any payload back
/// means open, an ICMP port-unreachable surfaces as a refused recv and
/// means closed, silence means filtered (indistinguishable from open on a
/// quiet service, which is inherent to UDP).
async fn probe_udp(addr: SocketAddr, deadline: Duration) -> ProbeOutcome {
    let bind_addr = if addr.is_ipv4() {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
    };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            return ProbeOutcome::EngineFailure(format!("cannot bind local UDP socket: {e}"));
        }
    };
    if let Err(e) = socket.connect(addr).await {
        return ProbeOutcome::Result(
            PortResult::new(addr.ip(), addr.port(), Protocol::Udp, PortState::Filtered)
                .with_diagnostic(e.to_string()),
        );
    }
    if let Err(e) = socket.send(&[0u8; 1]).await {
        return ProbeOutcome::Result(
            PortResult::new(addr.ip(), addr.port(), Protocol::Udp, PortState::Filtered)
                .with_diagnostic(e.to_string()),
        );
    }

    let mut buf = [0u8; 512];
    let state = match timeout(deadline, socket.recv(&mut buf)).await {
        Ok(Ok(_n)) => PortState::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortState::Closed,
        Ok(Err(e)) => {
            return ProbeOutcome::Result(
                PortResult::new(addr.ip(), addr.port(), Protocol::Udp, PortState::Filtered)
                    .with_diagnostic(e.to_string()),
            );
        }
        Err(_) => PortState::Filtered,
    };
    ProbeOutcome::Result(PortResult::new(
        addr.ip(),
        addr.port(),
        Protocol::Udp,
        state,
    ))
}
