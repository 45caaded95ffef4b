//! Completion-driven runtime.
//!
//! Platform-specific implementations:
//! - Linux: io_uring event loop
//!
//! Shared pieces:
//! - `Connection`: per-connection state machine and buffers
//! - `ConnectionRegistry`: slab of live connections
//! - `Token`: operation tracking for completion correlation

#[cfg(target_os = "linux")]
mod connection;
mod error;
#[cfg(target_os = "linux")]
mod token;

#[cfg(target_os = "linux")]
mod uring;

pub use error::{RunError, ServerError, SetupError};

#[cfg(target_os = "linux")]
pub use uring::EventLoop;

use crate::config::Config;
use crate::logger::Logger;
use crate::protocols::AnswerStrategy;

/// Run the server with the platform's completion backend.
pub fn run<A: AnswerStrategy, L: Logger>(
    config: &Config,
    answer: A,
    logger: L,
) -> Result<(), ServerError> {
    #[cfg(target_os = "linux")]
    {
        uring::run(config, answer, logger)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (config, answer, logger); // suppress unused warnings
        Err(ServerError::Unsupported)
    }
}
