//! Echo answer strategy.
//!
//! Copies the message back unchanged. Output is length-bounded rather
//! than terminated, so a message that fills the whole buffer is echoed
//! in full.

use super::AnswerStrategy;

/// Identity strategy: the answer is the input, truncated to capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAnswer;

impl AnswerStrategy for EchoAnswer {
    fn answer(&self, input: &[u8], output: &mut [u8]) -> usize {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_copies_input() {
        let mut out = [0u8; 32];
        let len = EchoAnswer.answer(b"Hello, world! #1(1)", &mut out);
        assert_eq!(&out[..len], b"Hello, world! #1(1)");
    }

    #[test]
    fn test_echo_exact_capacity() {
        let input = [b'x'; 16];
        let mut out = [0u8; 16];
        let len = EchoAnswer.answer(&input, &mut out);
        assert_eq!(len, 16);
        assert_eq!(out, input);
    }

    #[test]
    fn test_echo_truncates_to_capacity() {
        let mut out = [0u8; 4];
        let len = EchoAnswer.answer(b"abcdefgh", &mut out);
        assert_eq!(len, 4);
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_echo_empty() {
        let mut out = [0u8; 4];
        assert_eq!(EchoAnswer.answer(b"", &mut out), 0);
    }

    #[test]
    fn test_strategy_through_reference() {
        fn run<A: AnswerStrategy>(strategy: A) -> Vec<u8> {
            let mut out = [0u8; 8];
            let len = strategy.answer(b"ping", &mut out);
            out[..len].to_vec()
        }

        let boxed: Box<dyn AnswerStrategy> = Box::new(EchoAnswer);
        assert_eq!(run(&EchoAnswer), b"ping");
        assert_eq!(run(boxed), b"ping");
    }
}
