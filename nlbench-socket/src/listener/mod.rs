use thiserror::Error;

mod driver;
mod session;
mod socket;
mod stats;

pub use socket::*;
pub use stats::ListenerStats;

use crate::DEFAULT_PORT_BUFFER_SIZE;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Could not bind to any valid endpoints")]
    NoValidEndpoints,
    #[error("Listener is already bound")]
    AlreadyBound,
}

/// Listener options.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// The maximum number of concurrent sessions.
    max_clients: Option<usize>,
    /// Receive queue capacity of every session's port, in messages.
    port_buffer_size: usize,
    /// Largest inbound frame a session accepts.
    max_frame_size: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_clients: None,
            port_buffer_size: DEFAULT_PORT_BUFFER_SIZE,
            max_frame_size: nlbench_wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ListenerOptions {
    /// Sets the number of maximum concurrent sessions.
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = Some(max_clients);
        self
    }

    /// Sets the receive queue capacity of each session's port. Generated messages that find
    /// the queue full are dropped and reported to the peer as `ENOBUFS`.
    pub fn port_buffer_size(mut self, size: usize) -> Self {
        self.port_buffer_size = size.max(1);
        self
    }

    /// Sets the largest inbound frame a session accepts. Larger frames close the session.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// The listener state, shared between the driver task, its sessions and the listener.
#[derive(Debug, Default)]
pub(crate) struct SocketState {
    pub(crate) stats: ListenerStats,
}
