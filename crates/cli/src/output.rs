//! Output formatting for scan results, flow events, and alerts

use anyhow::Result;
use serde_json::json;
use std::time::Duration;

use netwarden_common::{
    Alert, CaptureStats, FlowEvent, InterfaceInfo, PortResult, PortState, ScanStats, ScanStatus,
};

/// Print scan results in the specified format
pub fn print_results(
    results: &[PortResult],
    stats: &ScanStats,
    status: &ScanStatus,
    elapsed: Duration,
    format: &str,
) -> Result<()> {
    match normalize(format) {
        "json" | "j" => print_results_json(results, stats, status, elapsed)?,
        "table" | "text" | "t" | "" => print_results_table(results, stats, status, elapsed),
        other => {
            eprintln!("Warning: Unknown format '{}', using default table format", other);
            print_results_table(results, stats, status, elapsed);
        }
    }
    Ok(())
}

/// Print results as ASCII table (sorted by IP and port)
fn print_results_table(
    results: &[PortResult],
    stats: &ScanStats,
    status: &ScanStatus,
    elapsed: Duration,
) {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.port.cmp(&b.port)));

    println!("\n{:-<72}", "");
    println!("{:<40} {:<10} {:<10} {:<10}", "HOST", "PORT", "STATE", "SERVICE");
    println!("{:-<72}", "");

    for result in &sorted {
        match result.state {
            PortState::Open | PortState::Filtered => {
                println!(
                    "{:<40} {:<10} {:<10} {:<10}",
                    result.address.to_string(),
                    format!("{}/{}", result.port, result.protocol),
                    result.state.to_string(),
                    result.service.as_deref().unwrap_or("unknown"),
                );
                if let Some(diag) = &result.diagnostic {
                    println!("  └ {}", diag);
                }
            }
            PortState::Closed => {}
        }
    }

    println!("{:-<72}", "");
    println!("\nSummary:");
    println!("  Status: {}", status);
    println!("  Probes completed: {}/{}", stats.completed, stats.total_probes);
    println!("  Open: {}", stats.open);
    println!("  Closed: {}", stats.closed);
    println!("  Filtered: {}", stats.filtered);
    if stats.probe_errors > 0 {
        println!("  Probe errors: {}", stats.probe_errors);
    }
    if stats.sink_errors > 0 {
        println!("  Sink errors: {}", stats.sink_errors);
    }
    println!("  Duration: {}", format_duration(elapsed));
    println!();
}

/// Print results as JSON, grouped by host
fn print_results_json(
    results: &[PortResult],
    stats: &ScanStats,
    status: &ScanStatus,
    elapsed: Duration,
) -> Result<()> {
    let mut by_host = std::collections::BTreeMap::new();
    for result in results {
        by_host
            .entry(result.address.to_string())
            .or_insert_with(Vec::new)
            .push(serde_json::to_value(result)?);
    }

    let output = json!({
        "scan_info": {
            "status": status.to_string(),
            "duration_seconds": elapsed.as_secs_f64(),
            "duration_formatted": format_duration(elapsed),
            "total_hosts": by_host.len(),
        },
        "stats": stats,
        "results": by_host,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print classifier alerts raised during the run
pub fn print_alerts(alerts: &[Alert], format: &str) -> Result<()> {
    if alerts.is_empty() {
        return Ok(());
    }

    match normalize(format) {
        "json" | "j" => {
            println!("{}", serde_json::to_string_pretty(alerts)?);
        }
        _ => {
            println!("Alerts:");
            for alert in alerts {
                println!(
                    "  [{}] {} (evidence: {} record{})",
                    alert.kind.as_str(),
                    alert.subject,
                    alert.evidence.len(),
                    if alert.evidence.len() == 1 { "" } else { "s" },
                );
            }
            println!();
        }
    }
    Ok(())
}

/// Print a single decoded flow as it is emitted
pub fn print_flow(event: &FlowEvent, format: &str) {
    match normalize(format) {
        "json" | "j" => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Warning: failed to serialize flow event: {}", e),
        },
        _ => println!("{}", event),
    }
}

/// Print capture session counters at shutdown
pub fn print_capture_summary(stats: &CaptureStats, format: &str) -> Result<()> {
    match normalize(format) {
        "json" | "j" => {
            println!("{}", serde_json::to_string_pretty(stats)?);
        }
        _ => {
            println!("\nCapture summary:");
            println!("  Frames read: {}", stats.frames_read);
            println!("  Flows emitted: {}", stats.emitted);
            println!("  Dropped (ring full): {}", stats.dropped);
            println!("  Undecoded: {}", stats.undecoded);
            if stats.read_errors > 0 {
                println!("  Read errors: {}", stats.read_errors);
            }
            if stats.sink_errors > 0 {
                println!("  Sink errors: {}", stats.sink_errors);
            }
            println!();
        }
    }
    Ok(())
}

/// Print capture-capable interfaces
pub fn print_interfaces(interfaces: &[InterfaceInfo]) {
    if interfaces.is_empty() {
        println!("No capture-capable interfaces found.");
        return;
    }

    println!("{:<20} {:<20} {:<40}", "ID", "NAME", "DESCRIPTION");
    println!("{:-<80}", "");
    for iface in interfaces {
        println!("{:<20} {:<20} {:<40}", iface.id, iface.name, iface.description);
    }
}

fn normalize(format: &str) -> &str {
    format.trim()
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwarden_common::Protocol;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_results() -> Vec<PortResult> {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        vec![
            PortResult::new(addr, 22, Protocol::Tcp, PortState::Open).with_service("ssh"),
            PortResult::new(addr, 23, Protocol::Tcp, PortState::Closed),
            PortResult::new(addr, 24, Protocol::Tcp, PortState::Filtered)
                .with_diagnostic("connect: host unreachable"),
        ]
    }

    #[test]
    fn results_json_is_well_formed() {
        let results = sample_results();
        let mut stats = ScanStats::new(3);
        for r in &results {
            stats.record(r);
        }
        let out = print_results_json(&results, &stats, &ScanStatus::Completed, Duration::from_secs(1));
        assert!(out.is_ok());
    }

    #[test]
    fn results_table_does_not_panic() {
        let results = sample_results();
        let stats = ScanStats::new(3);
        print_results_table(&results, &stats, &ScanStatus::Completed, Duration::from_millis(42));
    }

    #[test]
    fn unknown_format_falls_back() {
        let results = sample_results();
        let stats = ScanStats::new(3);
        assert!(print_results(
            &results,
            &stats,
            &ScanStatus::Completed,
            Duration::from_secs(1),
            "yaml"
        )
        .is_ok());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_millis(5500)), "5.500s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }
}
