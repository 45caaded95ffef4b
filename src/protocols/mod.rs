//! Answer strategies.
//!
//! The event loop treats one read as one message and hands the received
//! bytes to an [`AnswerStrategy`] once the delay timer fires. The strategy
//! decides what is written back.
//!
//! ## Strategies
//! - `echo`: identity transform, truncated to the output capacity

pub mod echo;

pub use echo::EchoAnswer;

/// Transformation from a received message to the bytes sent back.
///
/// Implementations must be pure and deterministic: the loop may call
/// `answer` for any connection at any time on its single thread.
pub trait AnswerStrategy {
    /// Write the answer for `input` into `output`.
    ///
    /// Returns the number of valid bytes written. Values larger than
    /// `output.len()` are clamped by the caller.
    fn answer(&self, input: &[u8], output: &mut [u8]) -> usize;
}

impl<T: AnswerStrategy + ?Sized> AnswerStrategy for &T {
    fn answer(&self, input: &[u8], output: &mut [u8]) -> usize {
        (**self).answer(input, output)
    }
}

impl<T: AnswerStrategy + ?Sized> AnswerStrategy for Box<T> {
    fn answer(&self, input: &[u8], output: &mut [u8]) -> usize {
        (**self).answer(input, output)
    }
}
