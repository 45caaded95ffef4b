//! delayed-echo: a TCP echo server that answers after a fixed delay
//!
//! A single thread drives every connection through io_uring:
//! accept, read, a delay timer, then write the answer back.
//!
//! Features:
//! - Pluggable answer strategy (echo by default)
//! - Admission control bounded by the configured connection limit
//! - Configuration via CLI arguments or TOML file
//! - Multi-client autotest harness

pub mod autotest;
pub mod config;
pub mod logger;
pub mod protocols;
pub mod runtime;
