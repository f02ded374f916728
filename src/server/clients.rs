//! Client registry: connection id → outbound queue of that connection.
//!
//! Executors never write to a socket. They push responses onto the queue of
//! the originating connection, and the connection task (the only owner of
//! the socket's write half) writes them out.
//!
//! Queues are bounded. A client that stops reading while commands keep
//! completing loses the responses that do not fit, instead of growing the
//! server's memory without limit.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, info, warn};

use super::protocol::Response;

/// Connection identifier, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Responses a connection may have waiting to be written
pub const OUTBOUND_QUEUE: usize = 256;

/// Registry of connected clients
#[derive(Debug)]
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Sender<Response>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_capacity(OUTBOUND_QUEUE)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose per-connection queues hold at most `capacity` responses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(0),
            queue_capacity: capacity.max(1),
        }
    }

    /// Register a new connection and return its id and outbound queue.
    pub fn register(&self) -> (ConnectionId, Receiver<Response>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.clients.insert(id, sender);
        debug!(conn = %id, "Client connected");
        (id, receiver)
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.clients.remove(&id).is_some() {
            debug!(conn = %id, "Client disconnected");
        }
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Queue a response for a connection. Neither a connection that is
    /// already gone nor one whose queue is full is an error: the response is
    /// dropped and the event logged.
    pub fn deliver(&self, id: ConnectionId, response: Response) -> bool {
        // Clone the sender so no map shard stays locked while sending
        let sender = self.clients.get(&id).map(|entry| entry.value().clone());
        let Some(sender) = sender else {
            info!(conn = %id, token = %response.token(), "Connection already closed while trying to send");
            return false;
        };

        match sender.try_send(response) {
            Ok(()) => true,
            Err(TrySendError::Full(response)) => {
                warn!(conn = %id, token = %response.token(), "Outbound queue full, dropping response");
                false
            }
            Err(TrySendError::Closed(response)) => {
                info!(conn = %id, token = %response.token(), "Connection already closed while trying to send");
                false
            }
        }
    }
}
