//! Runtime error types.
//!
//! `SetupError` covers everything that can fail before the first
//! submission; `RunError` covers the only failures that escape the loop
//! once it is running. Per-connection problems never surface here.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Failure while creating the listening socket or the ring. Fatal.
#[derive(Debug)]
pub enum SetupError {
    Socket(io::Error),
    SocketOption(&'static str, io::Error),
    Bind(SocketAddr, io::Error),
    Listen(io::Error),
    RingInit(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Socket(e) => write!(f, "Failed to create listening socket: {}", e),
            SetupError::SocketOption(opt, e) => write!(f, "Failed to set {}: {}", opt, e),
            SetupError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            SetupError::Listen(e) => write!(f, "Failed to listen: {}", e),
            SetupError::RingInit(e) => write!(f, "Failed to initialize io_uring: {}", e),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Socket(e)
            | SetupError::SocketOption(_, e)
            | SetupError::Bind(_, e)
            | SetupError::Listen(e)
            | SetupError::RingInit(e) => Some(e),
        }
    }
}

/// Failure of the completion machinery itself. Fatal.
#[derive(Debug)]
pub enum RunError {
    /// Waiting on or submitting to the ring failed.
    Completion(io::Error),
    /// An SQE could not be queued.
    SubmissionQueueFull,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Completion(e) => write!(f, "Completion queue error: {}", e),
            RunError::SubmissionQueueFull => write!(f, "Submission queue full"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Completion(e) => Some(e),
            RunError::SubmissionQueueFull => None,
        }
    }
}

/// Anything that stops the server.
#[derive(Debug)]
pub enum ServerError {
    Setup(SetupError),
    Run(RunError),
    /// No completion-based backend on this platform.
    Unsupported,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Setup(e) => write!(f, "{}", e),
            ServerError::Run(e) => write!(f, "{}", e),
            ServerError::Unsupported => {
                write!(f, "Unsupported platform: only Linux (io_uring) is supported")
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Setup(e) => Some(e),
            ServerError::Run(e) => Some(e),
            ServerError::Unsupported => None,
        }
    }
}

impl From<SetupError> for ServerError {
    fn from(e: SetupError) -> Self {
        ServerError::Setup(e)
    }
}

impl From<RunError> for ServerError {
    fn from(e: RunError) -> Self {
        ServerError::Run(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_setup_error_display() {
        let addr: SocketAddr = "0.0.0.0:7050".parse().unwrap();
        let err = SetupError::Bind(addr, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.to_string().starts_with("Failed to bind 0.0.0.0:7050"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_server_error_wraps() {
        let err: ServerError = RunError::SubmissionQueueFull.into();
        assert_eq!(err.to_string(), "Submission queue full");
        assert!(matches!(err, ServerError::Run(_)));

        let err: ServerError = SetupError::RingInit(io::Error::from_raw_os_error(libc::ENOSYS)).into();
        assert!(err.to_string().contains("io_uring"));
    }
}
