//! Connection registry: maps a user identity to its single live connection.
//!
//! At most one entry exists per identity. Registering again for the same
//! identity replaces the entry and hands the superseded handle back to the
//! caller, which decides whether to close it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::{ParleyError, ServerEvent, UserId};

/// Process-unique connection identifier.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// What the writer half of a live connection is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A pre-encoded JSON text frame.
    Frame(Arc<str>),
    /// Close the socket with the given reason.
    Close(&'static str),
}

/// Cheap, cloneable handle to a live connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: Option<UserId>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(user: Option<UserId>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity bound at connect time; `None` for untracked connections.
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Queue an already-encoded frame. Returns `false` if the connection has
    /// closed; the frame is dropped.
    pub fn send_frame(&self, frame: Arc<str>) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Encode and queue a single event.
    pub fn push(&self, event: &ServerEvent) -> Result<bool, ParleyError> {
        let frame: Arc<str> = event.to_json()?.into();
        Ok(self.send_frame(frame))
    }

    /// Ask the writer to close the socket.
    pub fn close(&self, reason: &'static str) -> bool {
        self.tx.send(Outbound::Close(reason)).is_ok()
    }

}

/// Identity → live connection map.
///
/// An owned value, not a global: each [`super::Relay`] holds its own, so
/// tests and future multi-process deployments can instantiate as many as
/// they need. Operations never fail and never emit events; callers trigger
/// the presence broadcast afterward.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<BTreeMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<UserId, ConnectionHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or overwrite the entry for `identity`. Returns the superseded
    /// handle, if there was one and it is a different connection.
    pub fn register(
        &self,
        identity: UserId,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let new_id = connection.id();
        let previous = self.map().insert(identity.clone(), connection);

        debug!(user = %identity, connection = new_id, "Connection registered");

        previous.filter(|prev| prev.id() != new_id)
    }

    /// Remove the entry for `identity` if present. Idempotent.
    pub fn unregister(&self, identity: &UserId) -> Option<ConnectionHandle> {
        let removed = self.map().remove(identity);
        if let Some(ref handle) = removed {
            debug!(user = %identity, connection = handle.id(), "Connection unregistered");
        }
        removed
    }

    /// Remove the entry for `identity` only if it still points at
    /// `connection`. Returns whether an entry was removed.
    pub fn unregister_connection(&self, identity: &UserId, connection: ConnectionId) -> bool {
        let mut map = self.map();
        match map.get(identity) {
            Some(current) if current.id() == connection => {
                map.remove(identity);
                debug!(user = %identity, connection, "Connection unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, identity: &UserId) -> Option<ConnectionHandle> {
        self.map().get(identity).cloned()
    }

    /// Identities currently registered, in ascending order.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.map().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
