//! Layered frame decoding: Ethernet -> IPv4/IPv6 -> TCP/UDP
//!
//! Best-effort: anything malformed or outside TCP/UDP yields `None` and is
//! counted by the pipeline, never fatal to the loop.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::net::IpAddr;
use std::time::SystemTime;

use netwarden_common::{FlowEvent, Protocol};

/// Decode one raw frame into a flow event.
pub fn decode_frame(frame: &[u8]) -> Option<FlowEvent> {
    let ethernet = EthernetPacket::new(frame)?;
    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => decode_ipv4(ethernet.payload(), frame.len()),
        EtherTypes::Ipv6 => decode_ipv6(ethernet.payload(), frame.len()),
        _ => None,
    }
}

fn decode_ipv4(payload: &[u8], frame_len: usize) -> Option<FlowEvent> {
    let ip = Ipv4Packet::new(payload)?;
    let src_ip = IpAddr::V4(ip.get_source());
    let dst_ip = IpAddr::V4(ip.get_destination());
    match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => decode_tcp(ip.payload(), src_ip, dst_ip, frame_len),
        IpNextHeaderProtocols::Udp => decode_udp(ip.payload(), src_ip, dst_ip, frame_len),
        _ => None,
    }
}

fn decode_ipv6(payload: &[u8], frame_len: usize) -> Option<FlowEvent> {
    let ip = Ipv6Packet::new(payload)?;
    let src_ip = IpAddr::V6(ip.get_source());
    let dst_ip = IpAddr::V6(ip.get_destination());
    match ip.get_next_header() {
        IpNextHeaderProtocols::Tcp => decode_tcp(ip.payload(), src_ip, dst_ip, frame_len),
        IpNextHeaderProtocols::Udp => decode_udp(ip.payload(), src_ip, dst_ip, frame_len),
        _ => None,
    }
}

fn decode_tcp(
    payload: &[u8],
    src_ip: IpAddr,
    dst_ip: IpAddr,
    frame_len: usize,
) -> Option<FlowEvent> {
    let tcp = TcpPacket::new(payload)?;
    Some(FlowEvent {
        src_ip,
        dst_ip,
        protocol: Protocol::Tcp,
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        length: frame_len,
        captured_at: SystemTime::now(),
    })
}

fn decode_udp(
    payload: &[u8],
    src_ip: IpAddr,
    dst_ip: IpAddr,
    frame_len: usize,
) -> Option<FlowEvent> {
    let udp = UdpPacket::new(payload)?;
    Some(FlowEvent {
        src_ip,
        dst_ip,
        protocol: Protocol::Udp,
        src_port: udp.get_source(),
        dst_port: udp.get_destination(),
        length: frame_len,
        captured_at: SystemTime::now(),
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::{tcp_frame, udp_frame};
    use super::*;

    #[test]
    fn decodes_udp() {
        let frame = udp_frame([10, 0, 0, 1], [10, 0, 0, 2], 5353, 53);
        let ev = decode_frame(&frame).expect("decodable frame");
        assert_eq!(ev.protocol, Protocol::Udp);
        assert_eq!(ev.src_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(ev.dst_ip, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(ev.src_port, 5353);
        assert_eq!(ev.dst_port, 53);
        assert_eq!(ev.length, frame.len());
    }

    #[test]
    fn decodes_tcp() {
        let frame = tcp_frame([192, 168, 0, 9], [192, 168, 0, 1], 45_000, 443);
        let ev = decode_frame(&frame).expect("decodable frame");
        assert_eq!(ev.protocol, Protocol::Tcp);
        assert_eq!(ev.dst_port, 443);
    }

    #[test]
    fn malformed_frames_are_skipped() {
        assert!(decode_frame(&[]).is_none());
        assert!(decode_frame(&[0u8; 10]).is_none());
        // Valid ethernet header, truncated IP payload.
        let mut frame = vec![0xffu8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame.extend_from_slice(&[0x45, 0x00]);
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn non_ip_ethertype_is_skipped() {
        // ARP ethertype
        let mut frame = vec![0u8; 42];
        frame[12] = 0x08;
        frame[13] = 0x06;
        assert!(decode_frame(&frame).is_none());
    }
}
