use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "netwarden")]
#[command(version = "0.1.0")]
#[command(about = "Scan orchestration and live-capture engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a target's ports
    Scan {
        /// Target: IP, hostname, CIDR, or range. Example: 192.168.1.0/24
        #[arg(short = 't', long, required = true)]
        targets: String,

        /// Port range. Examples: 80 or 1-1024
        #[arg(short, long, default_value = "1-1024")]
        ports: String,

        /// Probe protocol
        #[arg(long, default_value = "tcp", value_parser = ["tcp", "udp"])]
        protocol: String,

        /// Max concurrent probes
        #[arg(short, long, default_value = "256")]
        concurrency: usize,

        /// Rate limit (probes per second, 0 = unlimited)
        #[arg(short = 'r', long, default_value = "0")]
        rate_limit: u32,

        /// Per-probe timeout in milliseconds
        #[arg(long, default_value = "800")]
        timeout: u64,

        /// Maximum hosts a spec may expand to
        #[arg(long, default_value = "65536")]
        max_hosts: usize,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        output_format: String,
    },

    /// Capture and decode live traffic on an interface
    Capture {
        /// Interface id (see `netwarden interfaces`)
        #[arg(short, long, required = true)]
        interface: String,

        /// Snapshot length in bytes
        #[arg(long, default_value = "65536")]
        snap_len: usize,

        /// Capture in promiscuous mode
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        promiscuous: bool,

        /// Stop after this many decoded events (0 = until interrupted)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        output_format: String,
    },

    /// List capture-capable interfaces
    Interfaces,
}
