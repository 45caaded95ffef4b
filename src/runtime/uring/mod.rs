//! Linux io_uring event loop implementation.
//!
//! Completion-based I/O on a single thread: accept, receive, the delay
//! timer and send are all ring operations.

mod event_loop;

pub use event_loop::EventLoop;

use crate::config::Config;
use crate::logger::Logger;
use crate::protocols::AnswerStrategy;
use crate::runtime::ServerError;

/// Run the server using the io_uring backend.
pub fn run<A: AnswerStrategy, L: Logger>(
    config: &Config,
    answer: A,
    logger: L,
) -> Result<(), ServerError> {
    let event_loop = EventLoop::new(&config.socket, &config.server, answer, logger)?;
    event_loop.run()?;
    Ok(())
}
