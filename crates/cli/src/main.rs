mod args;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Scan {
            targets,
            ports,
            protocol,
            concurrency,
            rate_limit,
            timeout,
            max_hosts,
            output_format,
        } => {
            runner::run_scan(
                targets,
                ports,
                protocol,
                concurrency,
                rate_limit,
                timeout,
                max_hosts,
                output_format,
            )
            .await?;
        }
        Commands::Capture {
            interface,
            snap_len,
            promiscuous,
            count,
            output_format,
        } => {
            runner::run_capture(interface, snap_len, promiscuous, count, output_format).await?;
        }
        Commands::Interfaces => {
            output::print_interfaces(&netwarden_capture::list_interfaces());
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt().with_env_filter(filter).compact().init();
}
