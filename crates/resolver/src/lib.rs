//! Target Resolver - validates and expands scan specs
//!
//! Accepted spec forms:
//! - single IPv4/IPv6 address: "192.0.2.7", "2001:db8::1"
//! - CIDR: "192.168.1.0/24", "2001:db8::/120"
//! - address range: "192.168.1.1-192.168.1.10"
//! - hostname: "example.com"
//!
//! Expansion is bounded: the host count is computed from the prefix length
//! (or range width) before any iteration, and a spec that would exceed
//! `max_hosts` is rejected without touching the network. CIDR expansion is
//! ascending and deduplicated, so runs are reproducible.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::debug;

use netwarden_common::{ResolveError, ResolvedTarget};

/// Characters permitted in a target spec. Anything else is rejected before
/// parsing, which also defends downstream consumers of the raw spec string.
fn spec_charset_ok(spec: &str) -> bool {
    spec.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '/' | '-'))
}

/// Resolve a target spec into a bounded, deduplicated list of addresses.
///
/// DNS resolution runs inside `spawn_blocking` so the async runtime is
/// never blocked on the system resolver.
pub async fn resolve(spec: &str, max_hosts: usize) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let spec = spec.trim();
    if spec.is_empty() || !spec_charset_ok(spec) {
        return Err(ResolveError::InvalidTarget(spec.to_string()));
    }

    // CIDR
    if spec.contains('/') {
        return expand_cidr(spec, max_hosts);
    }

    // Direct IP literal
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(vec![ResolvedTarget::new(ip)]);
    }

    // IPv4 range: a.b.c.d-e.f.g.h (both sides must parse, otherwise the
    // dash belongs to a hostname)
    if let Some((start, end)) = parse_range_endpoints(spec) {
        return expand_range(spec, start, end, max_hosts);
    }

    // Hostname
    resolve_hostname(spec).await
}

fn expand_cidr(spec: &str, max_hosts: usize) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let net: IpNet = spec
        .parse()
        .map_err(|_| ResolveError::InvalidTarget(spec.to_string()))?;

    // Host count from the prefix length, before iterating anything.
    let host_count = match net {
        IpNet::V4(v4) => cidr_host_count(32, v4.prefix_len()),
        IpNet::V6(v6) => cidr_host_count(128, v6.prefix_len()),
    };
    if host_count > max_hosts as u128 {
        return Err(ResolveError::TooManyHosts {
            spec: spec.to_string(),
            hosts: host_count,
            max_hosts,
        });
    }

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(host_count as usize);
    match net {
        IpNet::V4(v4) => push_v4_hosts(v4, &mut seen, &mut targets),
        IpNet::V6(v6) => push_v6_hosts(v6, &mut seen, &mut targets),
    }
    debug!(spec, hosts = targets.len(), "expanded CIDR");
    Ok(targets)
}

/// Usable host count for a prefix. Network and broadcast are excluded for
/// IPv4 prefixes shorter than /31; /31 and /32 yield their literal
/// addresses (matching `ipnet`'s `hosts()` semantics).
fn cidr_host_count(bits: u8, prefix: u8) -> u128 {
    if prefix >= bits {
        return 1;
    }
    // ::/0 spans all 2^128 addresses; saturate instead of overflowing the
    // shift. Any count this large fails the max_hosts guard anyway.
    let total = match 1u128.checked_shl(u32::from(bits - prefix)) {
        Some(total) => total,
        None => return u128::MAX,
    };
    if bits == 32 && prefix < 31 {
        total.saturating_sub(2)
    } else {
        total
    }
}

fn push_v4_hosts(net: Ipv4Net, seen: &mut HashSet<IpAddr>, out: &mut Vec<ResolvedTarget>) {
    for addr in net.hosts() {
        let ip = IpAddr::V4(addr);
        if seen.insert(ip) {
            out.push(ResolvedTarget::new(ip));
        }
    }
}

fn push_v6_hosts(net: Ipv6Net, seen: &mut HashSet<IpAddr>, out: &mut Vec<ResolvedTarget>) {
    for addr in net.hosts() {
        let ip = IpAddr::V6(addr);
        if seen.insert(ip) {
            out.push(ResolvedTarget::new(ip));
        }
    }
}

fn parse_range_endpoints(spec: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (lhs, rhs) = spec.split_once('-')?;
    let start = lhs.parse::<Ipv4Addr>().ok()?;
    let end = rhs.parse::<Ipv4Addr>().ok()?;
    Some((start, end))
}

fn expand_range(
    spec: &str,
    start: Ipv4Addr,
    end: Ipv4Addr,
    max_hosts: usize,
) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let (start, end) = (u32::from(start), u32::from(end));
    if start > end {
        return Err(ResolveError::InvalidTarget(spec.to_string()));
    }
    let host_count = (end - start) as u128 + 1;
    if host_count > max_hosts as u128 {
        return Err(ResolveError::TooManyHosts {
            spec: spec.to_string(),
            hosts: host_count,
            max_hosts,
        });
    }
    let targets = (start..=end)
        .map(|v| ResolvedTarget::new(IpAddr::V4(Ipv4Addr::from(v))))
        .collect();
    Ok(targets)
}

async fn resolve_hostname(host: &str) -> Result<Vec<ResolvedTarget>, ResolveError> {
    let owned = host.to_string();
    let lookup = owned.clone();
    let addrs = tokio::task::spawn_blocking(move || {
        (lookup.as_str(), 0u16)
            .to_socket_addrs()
            .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<IpAddr>>())
    })
    .await
    .map_err(|_| ResolveError::Resolution(owned.clone()))?
    .map_err(|_| ResolveError::Resolution(owned.clone()))?;

    if addrs.is_empty() {
        return Err(ResolveError::Resolution(owned));
    }

    let mut seen = HashSet::new();
    let targets = addrs
        .into_iter()
        .filter(|ip| seen.insert(*ip))
        .map(ResolvedTarget::new)
        .collect();
    Ok(targets)
}
