//! delayed-echo server binary.
//!
//! Accepts TCP connections and echoes every message back after the
//! configured delay. Configuration via CLI arguments or TOML file.

use delayed_echo::config::Config;
use delayed_echo::logger::TracingLogger;
use delayed_echo::protocols::EchoAnswer;
use delayed_echo::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    ignore_sigpipe();

    info!(
        host = %config.socket.host,
        port = config.socket.port,
        backlog = config.socket.backlog,
        buffer_size = config.server.buffer_size,
        max_connections = config.server.max_connections,
        delay_secs = config.server.delay.as_secs(),
        "Starting delayed-echo server"
    );

    if let Err(e) = runtime::run(&config, EchoAnswer, TracingLogger) {
        error!(error = %e, "Server stopped");
        return Err(e.into());
    }

    Ok(())
}

/// A peer resetting mid-write must surface as EPIPE on that connection,
/// not kill the process.
fn ignore_sigpipe() {
    // SAFETY: installs SIG_IGN before any other thread exists.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
