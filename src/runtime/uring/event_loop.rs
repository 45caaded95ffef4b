//! io_uring event loop for Linux.
//!
//! Completion-based model: every socket operation and the per-message
//! delay are submitted to the ring, and the loop reacts to completions.
//! One thread is the only submitter and the only consumer.
//!
//! Per connection the cycle is strictly sequential:
//!
//! ```text
//! accept ─▶ read ─▶ timer ─▶ write ─▶ read ─▶ …
//! ```
//!
//! Exactly one accept is outstanding on the listener at any time; it is
//! re-armed from every accept completion, successful or not.

use crate::config::{ServerConfig, SocketConfig};
use crate::logger::Logger;
use crate::protocols::AnswerStrategy;
use crate::runtime::connection::{Connection, ConnectionRegistry, Phase, WriteProgress};
use crate::runtime::error::{RunError, SetupError};
use crate::runtime::token::{OpType, TokenAllocator};
use io_uring::{opcode, squeue, types, IoUring};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::ptr;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Single-threaded delayed echo server driven by io_uring completions.
pub struct EventLoop<A, L> {
    // Declared first so the ring is torn down before the buffers it may reference.
    ring: IoUring,
    listener: TcpListener,
    connections: ConnectionRegistry,
    tokens: TokenAllocator,
    /// Shared by every timer SQE; must stay put until the SQE is submitted.
    delay: types::Timespec,
    buffer_size: usize,
    answer: A,
    logger: L,
}

impl<A: AnswerStrategy, L: Logger> EventLoop<A, L> {
    /// Bind the listening socket and create the ring.
    pub fn new(
        socket: &SocketConfig,
        server: &ServerConfig,
        answer: A,
        logger: L,
    ) -> Result<Self, SetupError> {
        let listener = create_listener(socket)?;
        let local = listener.local_addr().map_err(SetupError::Socket)?;

        let entries = ring_entries(server.max_connections);
        let ring = IoUring::builder()
            .setup_clamp()
            .build(entries)
            .map_err(SetupError::RingInit)?;

        let cq_entries = ring.params().cq_entries();
        let max_connections = admission_limit(server.max_connections, cq_entries);
        if max_connections < server.max_connections {
            warn!(
                requested = server.max_connections,
                allowed = max_connections,
                cq_entries,
                "Ring is smaller than the connection limit, lowering the limit"
            );
        }

        debug!(
            requested = entries,
            sq_entries = ring.params().sq_entries(),
            cq_entries,
            max_connections,
            "io_uring initialized"
        );
        logger.info(&format!("Listening on port {}", local.port()));

        Ok(Self {
            ring,
            listener,
            connections: ConnectionRegistry::new(max_connections),
            // One accept plus at most one operation per connection
            tokens: TokenAllocator::new(max_connections.saturating_add(1)),
            delay: timespec(server.delay),
            buffer_size: server.buffer_size,
            answer,
            logger,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run forever. Returns only if the ring itself fails.
    ///
    /// Consumes the loop: after a ring failure its accept and any in-flight
    /// operations are in an unknown state, so it cannot be restarted.
    pub fn run(mut self) -> Result<(), RunError> {
        self.submit_accept()?;

        loop {
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RunError::Completion(e)),
            }

            loop {
                let cqe = match self.ring.completion().next() {
                    Some(cqe) => cqe,
                    None => break,
                };

                self.dispatch(cqe.user_data(), cqe.result())?;
            }
        }
    }

    fn dispatch(&mut self, token: u64, result: i32) -> Result<(), RunError> {
        let op = match self.tokens.free(token) {
            Some(op) => op,
            None => {
                self.logger
                    .error(&format!("Unknown operation in completion (token {})", token));
                return Ok(());
            }
        };

        if let Some(conn_id) = op.conn_id() {
            if !self.connections.contains(conn_id) {
                self.logger
                    .error(&format!("Completion {:?} for a connection that is gone", op));
                return Ok(());
            }
        }

        match op {
            OpType::Accept => self.on_accept(result),
            OpType::Read { conn_id } => self.on_read(conn_id, result),
            OpType::Timer { conn_id } => self.on_timer(conn_id, result),
            OpType::Write { conn_id } => self.on_write(conn_id, result),
        }
    }

    fn on_accept(&mut self, result: i32) -> Result<(), RunError> {
        // Always re-arm accept
        self.submit_accept()?;

        if result < 0 {
            let err = io::Error::from_raw_os_error(-result);
            self.logger
                .error(&format!("Cannot accept a new connection: {}", err));
            return Ok(());
        }

        // SAFETY: a successful accept hands us a fresh descriptor nobody else owns.
        let stream = unsafe { TcpStream::from_raw_fd(result) };
        let peer = stream.peer_addr().ok();

        // Check before allocating buffers; dropping the stream closes it
        if self.connections.is_full() {
            self.reject(peer);
            return Ok(());
        }

        let conn = Connection::new(stream, peer, self.buffer_size);
        let conn_id = match self.connections.insert(conn) {
            Ok(id) => id,
            Err(conn) => {
                self.reject(conn.peer_addr());
                return Ok(());
            }
        };

        if let Some(conn) = self.connections.get(conn_id) {
            self.logger
                .info(&format!("Connection accepted from {}", conn.peer_label()));
        }
        debug!(conn_id, fd = result, live = self.connections.len(), "Accepted connection");

        self.submit_read(conn_id)
    }

    fn reject(&self, peer: Option<SocketAddr>) {
        let peer = peer.map_or_else(|| "unknown peer".to_string(), |addr| addr.to_string());
        self.logger.error(&format!(
            "Connection limit ({}) reached, rejecting {}",
            self.connections.capacity(),
            peer
        ));
    }

    fn on_read(&mut self, conn_id: usize, result: i32) -> Result<(), RunError> {
        if result <= 0 {
            if result < 0 {
                let err = io::Error::from_raw_os_error(-result);
                debug!(conn_id, "Read error: {}", err);
            } else {
                debug!(conn_id, "Connection closed by peer");
            }
            self.close_connection(conn_id);
            return Ok(());
        }

        let conn = match self.connections.get_mut(conn_id) {
            Some(c) => c,
            None => return Ok(()),
        };
        debug_assert_eq!(conn.phase(), Phase::Reading);

        conn.await_timer(result as usize);
        self.logger.info(&format!(
            "Received {} bytes from {}: {}",
            conn.message().len(),
            conn.peer_label(),
            String::from_utf8_lossy(conn.message())
        ));

        self.submit_timer(conn_id)
    }

    fn on_timer(&mut self, conn_id: usize, result: i32) -> Result<(), RunError> {
        if result != -libc::ETIME {
            // Anything but a normal expiry ends the connection
            if result < 0 {
                let err = io::Error::from_raw_os_error(-result);
                debug!(conn_id, "Timer failed: {}", err);
            } else {
                self.logger
                    .error(&format!("Unexpected timer result {} on connection {}", result, conn_id));
            }
            self.close_connection(conn_id);
            return Ok(());
        }

        let conn = match self.connections.get_mut(conn_id) {
            Some(c) => c,
            None => return Ok(()),
        };
        debug_assert_eq!(conn.phase(), Phase::AwaitingTimer);

        if conn.prepare_answer(&self.answer) == 0 {
            // Nothing to send
            conn.start_reading();
            return self.submit_read(conn_id);
        }

        self.submit_write(conn_id)
    }

    fn on_write(&mut self, conn_id: usize, result: i32) -> Result<(), RunError> {
        if result < 0 {
            let err = io::Error::from_raw_os_error(-result);
            debug!(conn_id, "Write error: {}", err);
            self.close_connection(conn_id);
            return Ok(());
        }

        let conn = match self.connections.get_mut(conn_id) {
            Some(c) => c,
            None => return Ok(()),
        };

        match conn.record_written(result as usize) {
            WriteProgress::Done => {
                conn.start_reading();
                self.submit_read(conn_id)
            }
            WriteProgress::Partial { remaining } if result > 0 => {
                debug!(conn_id, remaining, "Partial write");
                self.submit_write(conn_id)
            }
            WriteProgress::Partial { .. } => {
                debug!(conn_id, "Zero-length write, peer gone");
                self.close_connection(conn_id);
                Ok(())
            }
        }
    }

    fn submit_accept(&mut self) -> Result<(), RunError> {
        let token = self.tokens.alloc(OpType::Accept);

        let accept = opcode::Accept::new(
            types::Fd(self.listener.as_raw_fd()),
            ptr::null_mut(),
            ptr::null_mut(),
        )
        .flags(libc::SOCK_CLOEXEC)
        .build()
        .user_data(token);

        self.push(accept)
    }

    fn submit_read(&mut self, conn_id: usize) -> Result<(), RunError> {
        let conn = match self.connections.get_mut(conn_id) {
            Some(c) => c,
            None => return Ok(()),
        };

        let fd = conn.fd();
        trace!(conn_id, bytes = conn.pending(), "Submitting read");
        let (buf, len) = conn.read_buf();
        let token = self.tokens.alloc(OpType::Read { conn_id });

        let recv = opcode::Recv::new(types::Fd(fd), buf, io_len(len))
            .build()
            .user_data(token);

        self.push(recv)
    }

    fn submit_timer(&mut self, conn_id: usize) -> Result<(), RunError> {
        let token = self.tokens.alloc(OpType::Timer { conn_id });

        let timeout = opcode::Timeout::new(&self.delay)
            .build()
            .user_data(token);

        self.push(timeout)
    }

    fn submit_write(&mut self, conn_id: usize) -> Result<(), RunError> {
        let conn = match self.connections.get(conn_id) {
            Some(c) => c,
            None => return Ok(()),
        };

        let fd = conn.fd();
        trace!(conn_id, bytes = conn.pending(), "Submitting write");
        let (buf, len) = conn.write_buf();
        let token = self.tokens.alloc(OpType::Write { conn_id });

        let send = opcode::Send::new(types::Fd(fd), buf, io_len(len))
            .flags(libc::MSG_NOSIGNAL)
            .build()
            .user_data(token);

        self.push(send)
    }

    fn push(&mut self, entry: squeue::Entry) -> Result<(), RunError> {
        // SAFETY: every buffer an entry points at is owned by a connection in
        // the registry (or by `self`), and a connection is only removed from
        // a completion of its single outstanding operation.
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return Ok(());
        }

        // Queue is full of unsubmitted entries: hand them to the kernel and retry
        self.ring.submit().map_err(RunError::Completion)?;
        unsafe { self.ring.submission().push(&entry) }.map_err(|_| RunError::SubmissionQueueFull)
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(conn) = self.connections.remove(conn_id) {
            self.logger
                .info(&format!("Connection closed: {}", conn.peer_label()));
            debug!(
                conn_id,
                live = self.connections.len(),
                in_flight = self.tokens.len(),
                "Connection removed"
            );
            // Socket closes here
            drop(conn);
        }
    }
}

/// Create the listening socket with SO_REUSEADDR and SO_REUSEPORT.
fn create_listener(config: &SocketConfig) -> Result<TcpListener, SetupError> {
    let addr = SocketAddr::new(config.host, config.port);

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(SetupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(|e| SetupError::SocketOption("SO_REUSEADDR", e))?;
    socket
        .set_reuse_port(true)
        .map_err(|e| SetupError::SocketOption("SO_REUSEPORT", e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| SetupError::Bind(addr, e))?;

    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(SetupError::Listen)?;

    Ok(socket.into())
}

/// Ring depth for `max_connections` live connections plus the accept.
///
/// The kernel rounds up to a power of two; `setup_clamp` caps it.
fn ring_entries(max_connections: usize) -> u32 {
    u32::try_from(max_connections.saturating_add(1)).unwrap_or(u32::MAX)
}

/// Connections the ring can serve: each one holds at most one operation
/// and the accept takes another, so all of them fit in the completion queue.
fn admission_limit(max_connections: usize, cq_entries: u32) -> usize {
    let ring_limit = usize::try_from(cq_entries.saturating_sub(1)).unwrap_or(usize::MAX);
    max_connections.min(ring_limit)
}

fn timespec(delay: Duration) -> types::Timespec {
    types::Timespec::new()
        .sec(delay.as_secs())
        .nsec(delay.subsec_nanos())
}

fn io_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
