//! Concurrent client that exercises a running delayed-echo server.

use clap::Parser;
use delayed_echo::autotest::{self, AutotestConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the autotest client
#[derive(Parser, Debug)]
#[command(name = "echo-autotest")]
#[command(version = "0.1.0")]
#[command(about = "Checks a delayed-echo server with concurrent clients", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7050")]
    addr: SocketAddr,

    /// Number of concurrent clients
    #[arg(short, long, default_value_t = 3)]
    clients: usize,

    /// Messages per client
    #[arg(short, long, default_value_t = 3)]
    messages: usize,

    /// Server delay in seconds; answers arriving sooner fail the test
    #[arg(short, long, default_value_t = 5)]
    delay: u64,

    /// Seconds to wait for a single answer
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = AutotestConfig {
        addr: args.addr,
        clients: args.clients,
        messages: args.messages,
        min_delay: Duration::from_secs(args.delay),
        timeout: Duration::from_secs(args.timeout),
    };

    match autotest::run(&config).await {
        Ok(report) => {
            info!(
                exchanges = report.exchanges.len(),
                fastest_ms = report.fastest().map(|d| d.as_millis() as u64),
                slowest_ms = report.slowest().map(|d| d.as_millis() as u64),
                "All tests passed"
            );
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
