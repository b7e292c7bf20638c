//! Byte-stream transports the accessory link runs over.
//!
//! The link needs three things from a transport: a listening endpoint that
//! blocks in `accept`, an accepted channel with independent read and write
//! halves, and a way to close either of them from another thread. Closing is
//! the only cancellation mechanism: it must unblock a pending `accept` or
//! `read`.
//!
//! Two implementations are provided:
//! - [`TcpTransport`]: TCP sockets, a stand-in for an RFCOMM server socket
//! - [`MemoryTransport`]: in-process pipes, used for tests and embedding

mod memory;
mod tcp;

pub use memory::*;
pub use tcp::*;

use std::io::{self, Read, Write};
use std::sync::Arc;

/// Closes an endpoint or channel from any thread.
pub trait Closer: Send + Sync {
    /// Close the endpoint, unblocking any thread waiting on it.
    ///
    /// Calling this more than once has no further effect.
    fn close(&self);
}

/// An accepted channel to the accessory.
pub struct Connection {
    /// Human-readable identity of the remote device.
    pub peer: String,
    /// Input half.
    pub reader: Box<dyn Read + Send>,
    /// Output half.
    pub writer: Box<dyn Write + Send>,
    /// Closes both halves.
    pub closer: Arc<dyn Closer>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// A listening endpoint.
pub trait Listener: Send {
    /// Block until an accessory connects.
    fn accept(&mut self) -> io::Result<Connection>;

    /// Handle that closes this endpoint, failing a pending [`accept`](Self::accept).
    fn closer(&self) -> Arc<dyn Closer>;
}

/// Factory for listening endpoints.
pub trait Transport: Send + Sync {
    /// Open a new listening endpoint advertised as `service_name`.
    ///
    /// Transports with a service registry (an RFCOMM service record) publish
    /// the name there; the others only report it.
    fn listen(&self, service_name: &str) -> io::Result<Box<dyn Listener>>;
}
