//! Presence broadcast.
//!
//! After every registry change the broadcaster takes a snapshot of the
//! online set and pushes it to every open connection, tracked or not. The
//! cost is O(connections) per churn event; presence churn is rare compared
//! with message traffic, so the client gets full state each time instead of
//! having to apply deltas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use parley_shared::{ServerEvent, UserId};

use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Turns an online snapshot into the event pushed to every connection.
///
/// Returning `None` skips the broadcast.
pub trait PresenceEncoding: Send + Sync {
    fn encode(&self, online: &[UserId]) -> Option<ServerEvent>;
}

/// The full online set, verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullState;

impl PresenceEncoding for FullState {
    fn encode(&self, online: &[UserId]) -> Option<ServerEvent> {
        Some(ServerEvent::OnlineSet(online.to_vec()))
    }
}

/// Outcome of a single broadcast, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub online: Vec<UserId>,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: ConnectionRegistry,
    /// Every open connection, including untracked and superseded ones.
    audience: Arc<Mutex<HashMap<ConnectionId, ConnectionHandle>>>,
    encoding: Arc<dyn PresenceEncoding>,
    /// Serializes broadcasts so the last one delivered reflects the latest
    /// snapshot. Registrations never take this lock.
    sequence: Arc<Mutex<u64>>,
}

impl PresenceBroadcaster {
    pub fn new(registry: ConnectionRegistry, encoding: Arc<dyn PresenceEncoding>) -> Self {
        Self {
            registry,
            audience: Arc::new(Mutex::new(HashMap::new())),
            encoding,
            sequence: Arc::new(Mutex::new(0)),
        }
    }

    fn audience(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.audience
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start delivering broadcasts to `connection`.
    pub fn attach(&self, connection: ConnectionHandle) {
        self.audience().insert(connection.id(), connection);
    }

    /// Stop delivering broadcasts to `connection`. Idempotent.
    pub fn detach(&self, connection: ConnectionId) {
        self.audience().remove(&connection);
    }

    pub fn audience_size(&self) -> usize {
        self.audience().len()
    }

    /// Snapshot the registry and push the online set to every open
    /// connection. Best-effort: closed connections are skipped silently.
    pub fn broadcast(&self) -> BroadcastReport {
        let mut seq = self
            .sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *seq += 1;

        let online = self.registry.snapshot();
        let Some(event) = self.encoding.encode(&online) else {
            return BroadcastReport {
                online,
                ..Default::default()
            };
        };

        let frame: Arc<str> = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Failed to encode presence event");
                return BroadcastReport {
                    online,
                    ..Default::default()
                };
            }
        };

        let targets: Vec<ConnectionHandle> = self.audience().values().cloned().collect();

        let mut report = BroadcastReport {
            online,
            ..Default::default()
        };
        for target in &targets {
            if target.send_frame(frame.clone()) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
            }
        }

        debug!(
            seq = *seq,
            online = report.online.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Presence broadcast"
        );

        report
    }
}
