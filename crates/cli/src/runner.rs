use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::info;

use netwarden_common::{CaptureConfig, Protocol, ScanRequest};
use netwarden_engine::{Engine, EngineConfig, MemorySink};

use crate::output;

#[allow(clippy::too_many_arguments)]
pub async fn run_scan(
    targets: String,
    ports: String,
    protocol: String,
    concurrency: usize,
    rate_limit: u32,
    timeout: u64,
    max_hosts: usize,
    output_format: String,
) -> Result<()> {
    let port_range = parse_ports(&ports)?;
    let protocol = match protocol.as_str() {
        "udp" => Protocol::Udp,
        _ => Protocol::Tcp,
    };

    info!("Targets: {}", targets);
    info!("Ports: {}-{}", port_range.0, port_range.1);
    info!("Concurrency: {}", concurrency);

    let mut request = ScanRequest::new(targets, port_range)
        .with_protocol(protocol)
        .with_concurrency(concurrency)
        .with_timeout(Duration::from_millis(timeout.max(1)));
    request.max_hosts = max_hosts;
    if rate_limit > 0 {
        request = request.with_rate_limit(rate_limit);
    }

    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(EngineConfig::default(), sink, None);

    let started_wall = SystemTime::now();
    let started = Instant::now();
    let (results, stats, status) = engine
        .scan_collect(request)
        .await
        .map_err(|e| anyhow!("scan failed to start: {e}"))?;
    let elapsed = started.elapsed();

    let alerts = engine.alerts_since(started_wall).await;
    output::print_results(&results, &stats, &status, elapsed, &output_format)?;
    output::print_alerts(&alerts, &output_format)?;
    Ok(())
}

pub async fn run_capture(
    interface: String,
    snap_len: usize,
    promiscuous: bool,
    count: u64,
    output_format: String,
) -> Result<()> {
    let config = CaptureConfig::new(interface)
        .with_snap_len(snap_len)
        .with_promiscuous(promiscuous);

    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(EngineConfig::default(), sink, None);
    let started_wall = SystemTime::now();

    let mut handle = engine
        .start_capture(&config)
        .map_err(|e| anyhow!("capture failed to start: {e}"))?;
    let stopper = handle.stopper();

    let format = output_format.clone();
    let mut events_task = tokio::spawn(async move {
        let mut seen: u64 = 0;
        while let Some(event) = handle.next().await {
            output::print_flow(&event, &format);
            seen += 1;
            if count > 0 && seen >= count {
                handle.stop();
                break;
            }
        }
        handle
    });

    let handle = tokio::select! {
        joined = &mut events_task => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing capture session");
            stopper.stop();
            events_task.await?
        }
    };

    let stats = handle.wait().await;
    let alerts = engine.alerts_since(started_wall).await;
    output::print_capture_summary(&stats, &output_format)?;
    output::print_alerts(&alerts, &output_format)?;
    Ok(())
}

/// Parse "80" or "20-25" into an inclusive range.
fn parse_ports(spec: &str) -> Result<(u16, u16)> {
    let spec = spec.trim();
    if let Some((low, high)) = spec.split_once('-') {
        let low: u16 = low.trim().parse().map_err(|_| anyhow!("invalid port: {low}"))?;
        let high: u16 = high
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid port: {high}"))?;
        if low > high {
            return Err(anyhow!("port range {spec} is inverted"));
        }
        Ok((low, high))
    } else {
        let port: u16 = spec.parse().map_err(|_| anyhow!("invalid port: {spec}"))?;
        Ok((port, port))
    }
}
