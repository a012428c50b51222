//! Connection Manager
//!
//! Live WebSocket connections and their outbound queues. Sends never block
//! the relay: a connection whose queue is full loses the message.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::core::ids::ConnectionId;
use crate::network::protocol::{ConnectedInfo, ServerMessage};

/// Outbound queue capacity per connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Connected client state.
struct ConnectedClient {
    /// Message sender (drained by the connection's writer task).
    sender: mpsc::Sender<ServerMessage>,
    /// Connection time.
    connected_at: Instant,
}

/// Table of live connections.
#[derive(Default)]
pub struct ConnectionManager {
    clients: HashMap<ConnectionId, ConnectedClient>,
}

impl ConnectionManager {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection and tell it its id.
    pub fn register(&mut self, id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.clients.insert(id, ConnectedClient {
            sender,
            connected_at: Instant::now(),
        });
        self.send(&id, ServerMessage::Connected(ConnectedInfo { connection_id: id }));
    }

    /// Forget a connection. Returns `false` if it was already gone.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        match self.clients.remove(id) {
            Some(client) => {
                debug!(
                    "Connection {} unregistered after {:?}",
                    id.short(),
                    client.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Whether `id` is live.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    /// Queue a message for one connection. Returns whether it was queued.
    pub fn send(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        let Some(client) = self.clients.get(id) else {
            debug!("Dropping message for unknown connection {}", id.short());
            return false;
        };

        match client.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("Outbound queue full for {}, dropping {}", id.short(), message.event_name());
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", id.short());
                false
            }
        }
    }

    /// Queue a message for every live connection.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.clients
            .keys()
            .filter(|id| self.send(id, message.clone()))
            .count()
    }

    /// Live connection count.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
