//! Logging sink used by the event loop.
//!
//! The loop only ever reports plain text at two levels. `TracingLogger`
//! forwards those lines to the process-wide `tracing` subscriber.

use tracing::{error, info};

/// Text sink for operator-visible events.
///
/// Implementations must not block for long and must not panic; they run
/// on the loop thread between completions.
pub trait Logger {
    fn info(&self, text: &str);
    fn error(&self, text: &str);
}

/// Forwards to `tracing` at the `info` and `error` levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, text: &str) {
        info!("{}", text);
    }

    fn error(&self, text: &str) {
        error!("{}", text);
    }
}

impl<T: Logger + ?Sized> Logger for &T {
    fn info(&self, text: &str) {
        (**self).info(text)
    }

    fn error(&self, text: &str) {
        (**self).error(text)
    }
}

impl<T: Logger + ?Sized> Logger for std::sync::Arc<T> {
    fn info(&self, text: &str) {
        (**self).info(text)
    }

    fn error(&self, text: &str) {
        (**self).error(text)
    }
}
