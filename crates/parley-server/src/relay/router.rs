//! Live delivery of persisted messages.

use tracing::{debug, warn};

use parley_shared::{Message, ServerEvent};

use super::registry::{ConnectionId, ConnectionRegistry};

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Pushed once to the receiver's current connection.
    Delivered(ConnectionId),
    /// Receiver not connected; it will see the message on its next fetch.
    Offline,
    /// Receiver's connection closed between lookup and push.
    Dropped,
}

/// Pushes a stored message to its receiver's live connection, if any.
///
/// There is no queue and no retry: anything not pushed is recovered by the
/// receiver's next conversation fetch.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Route `message`. Must only be called once the message is durably
    /// stored. Never fails.
    pub fn route(&self, message: &Message) -> RouteOutcome {
        let Some(connection) = self.registry.lookup(&message.receiver_id) else {
            debug!(
                msg = %message.id,
                receiver = %message.receiver_id,
                "Receiver offline, leaving message for next fetch"
            );
            return RouteOutcome::Offline;
        };

        match connection.push(&ServerEvent::NewMessage(message.clone())) {
            Ok(true) => {
                debug!(
                    msg = %message.id,
                    receiver = %message.receiver_id,
                    connection = connection.id(),
                    "Message pushed"
                );
                RouteOutcome::Delivered(connection.id())
            }
            Ok(false) => {
                debug!(msg = %message.id, "Receiver connection closed, push dropped");
                RouteOutcome::Dropped
            }
            Err(e) => {
                warn!(msg = %message.id, error = %e, "Failed to encode message push");
                RouteOutcome::Dropped
            }
        }
    }
}
