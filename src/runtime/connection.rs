//! Connection state machine and registry.
//!
//! A connection owns its socket and both buffers. The kernel borrows a
//! buffer from submission until the matching completion is reaped; since
//! each connection has at most one operation in flight and is removed
//! only from one of its own completions, the buffers are never freed
//! underneath the kernel.

use crate::protocols::AnswerStrategy;
use slab::Slab;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// Operation currently outstanding for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Receive pending into the input buffer.
    Reading,
    /// Message received, waiting for the delay timer.
    AwaitingTimer,
    /// Answer being sent from the output buffer.
    Writing {
        /// Bytes already written.
        written: usize,
        /// Total bytes to write.
        total: usize,
    },
}

/// Result of accounting a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// The whole answer has been sent.
    Done,
    /// Part of the answer is still pending.
    Partial { remaining: usize },
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    input: Box<[u8]>,
    output: Box<[u8]>,
    /// Bytes held in `input` by the last read.
    received: usize,
    /// Bytes the outstanding operation is expected to move.
    pending: usize,
    phase: Phase,
}

impl Connection {
    /// Create a new connection in the reading phase.
    pub fn new(stream: TcpStream, peer: Option<SocketAddr>, buffer_size: usize) -> Self {
        Self {
            stream,
            peer,
            input: vec![0u8; buffer_size].into_boxed_slice(),
            output: vec![0u8; buffer_size].into_boxed_slice(),
            received: 0,
            pending: buffer_size,
            phase: Phase::Reading,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Printable peer address for log lines.
    pub fn peer_label(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => "unknown peer".to_string(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Bytes of the last message.
    pub fn message(&self) -> &[u8] {
        &self.input[..self.received]
    }

    /// Transition to reading; the whole input buffer is offered to the kernel.
    pub fn start_reading(&mut self) {
        self.received = 0;
        self.pending = self.input.len();
        self.phase = Phase::Reading;
    }

    /// Record a completed read of `n` bytes and wait for the delay timer.
    pub fn await_timer(&mut self, n: usize) {
        self.received = n.min(self.input.len());
        self.pending = self.received;
        self.phase = Phase::AwaitingTimer;
    }

    /// Run `strategy` over the last message and transition to writing.
    ///
    /// Returns the answer length, clamped to the output capacity.
    pub fn prepare_answer<A: AnswerStrategy + ?Sized>(&mut self, strategy: &A) -> usize {
        let len = strategy
            .answer(&self.input[..self.received], &mut self.output)
            .min(self.output.len());
        self.phase = Phase::Writing {
            written: 0,
            total: len,
        };
        self.pending = len;
        len
    }

    /// Account for `n` bytes sent by the last write.
    pub fn record_written(&mut self, n: usize) -> WriteProgress {
        match &mut self.phase {
            Phase::Writing { written, total } => {
                *written = (*written + n).min(*total);
                let remaining = *total - *written;
                self.pending = remaining;
                if remaining == 0 {
                    WriteProgress::Done
                } else {
                    WriteProgress::Partial { remaining }
                }
            }
            _ => WriteProgress::Done,
        }
    }

    /// Buffer region for the next receive.
    pub fn read_buf(&mut self) -> (*mut u8, usize) {
        (self.input.as_mut_ptr(), self.input.len())
    }

    /// Unsent part of the answer.
    pub fn write_buf(&self) -> (*const u8, usize) {
        match self.phase {
            Phase::Writing { written, total } => (self.output[written..].as_ptr(), total - written),
            _ => (self.output.as_ptr(), 0),
        }
    }
}

/// Registry of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. Removing a
/// connection drops it, which closes its socket exactly once.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// True once the admission limit is reached.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Insert a freshly accepted connection.
    ///
    /// At capacity the connection is handed back so the caller can reject it.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
