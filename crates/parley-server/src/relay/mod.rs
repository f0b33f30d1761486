//! Presence and live message relay.
//!
//! [`Relay`] ties the registry, the presence broadcaster and the router
//! together behind the three things the rest of the server does with live
//! connections: connect, disconnect and route.

pub mod handshake;
pub mod presence;
pub mod registry;
pub mod router;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use parley_shared::{Message, UserId};

use self::presence::{BroadcastReport, FullState, PresenceBroadcaster, PresenceEncoding};
use self::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use self::router::{MessageRouter, RouteOutcome};

/// What to do with a connection replaced by a newer one for the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedePolicy {
    /// Send the old connection a close.
    Close,
    /// Leave it open; it keeps receiving broadcasts but no routed messages.
    KeepOpen,
}

impl SupersedePolicy {
    pub fn from_flag(close_superseded: bool) -> Self {
        if close_superseded {
            Self::Close
        } else {
            Self::KeepOpen
        }
    }
}

pub const SUPERSEDED_REASON: &str = "superseded by a newer connection";

#[derive(Clone)]
pub struct Relay {
    registry: ConnectionRegistry,
    presence: PresenceBroadcaster,
    router: MessageRouter,
    supersede: SupersedePolicy,
}

impl Relay {
    pub fn new(supersede: SupersedePolicy) -> Self {
        Self::with_encoding(supersede, Arc::new(FullState))
    }

    pub fn with_encoding(supersede: SupersedePolicy, encoding: Arc<dyn PresenceEncoding>) -> Self {
        let registry = ConnectionRegistry::new();
        Self {
            presence: PresenceBroadcaster::new(registry.clone(), encoding),
            router: MessageRouter::new(registry.clone()),
            registry,
            supersede,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Open a connection. Identified connections are registered (replacing
    /// any previous one for that user); every connection joins the
    /// broadcast audience, and the new online set goes out to all of them.
    pub fn connect(
        &self,
        user: Option<UserId>,
    ) -> (ConnectionHandle, UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::channel(user.clone());
        self.presence.attach(handle.clone());

        match user {
            Some(user) => {
                if let Some(old) = self.registry.register(user.clone(), handle.clone()) {
                    info!(
                        user = %user,
                        old = old.id(),
                        new = handle.id(),
                        policy = ?self.supersede,
                        "Connection superseded"
                    );
                    if self.supersede == SupersedePolicy::Close {
                        old.close(SUPERSEDED_REASON);
                    }
                }
                info!(user = %user, connection = handle.id(), "User connected");
            }
            None => {
                info!(connection = handle.id(), "Untracked connection opened");
            }
        }

        self.presence.broadcast();
        (handle, rx)
    }

    /// Close a connection. Only removes the registry entry if it still
    /// belongs to this connection, then broadcasts.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> BroadcastReport {
        self.presence.detach(handle.id());
        if let Some(user) = handle.user() {
            let removed = self.registry.unregister_connection(user, handle.id());
            info!(user = %user, connection = handle.id(), removed, "User disconnected");
        } else {
            info!(connection = handle.id(), "Untracked connection closed");
        }
        self.presence.broadcast()
    }

    /// Push a stored message to its receiver, if online.
    pub fn route(&self, message: &Message) -> RouteOutcome {
        self.router.route(message)
    }

    pub fn online(&self) -> Vec<UserId> {
        self.registry.snapshot()
    }

    pub fn open_connections(&self) -> usize {
        self.presence.audience_size()
    }
}
