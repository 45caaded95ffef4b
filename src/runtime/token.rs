//! Operation token tracking for io_uring completion correlation.
//!
//! Each submitted operation gets a token (the SQE `user_data`) that maps
//! back to the operation kind and the connection it belongs to when the
//! completion arrives.

use slab::Slab;

/// Kind of in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// Accept on the listening socket. Owned by the loop, not a connection.
    Accept,
    /// Receive into the connection's input buffer.
    Read {
        /// Connection identifier in the registry.
        conn_id: usize,
    },
    /// Delay timer armed after a successful read.
    Timer {
        /// Connection identifier in the registry.
        conn_id: usize,
    },
    /// Send from the connection's output buffer.
    Write {
        /// Connection identifier in the registry.
        conn_id: usize,
    },
}

impl OpType {
    /// Connection the operation belongs to, if any.
    pub fn conn_id(&self) -> Option<usize> {
        match *self {
            OpType::Accept => None,
            OpType::Read { conn_id } | OpType::Timer { conn_id } | OpType::Write { conn_id } => {
                Some(conn_id)
            }
        }
    }
}

/// Allocator for operation tokens with O(1) lookup.
///
/// Uses a slab so tokens are small, reusable integers.
pub struct TokenAllocator {
    ops: Slab<OpType>,
}

impl TokenAllocator {
    /// Create a new token allocator with specified capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            ops: Slab::with_capacity(capacity),
        }
    }

    /// Allocate a new token for an operation.
    pub fn alloc(&mut self, op: OpType) -> u64 {
        self.ops.insert(op) as u64
    }

    /// Free a token, returning the operation it was tracking.
    ///
    /// Returns `None` for tokens that were never issued or are already freed.
    pub fn free(&mut self, token: u64) -> Option<OpType> {
        let idx = usize::try_from(token).ok()?;
        self.ops.try_remove(idx)
    }

    /// Number of operations currently in flight.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}
