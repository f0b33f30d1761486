use tracing::debug;

use parley_shared::constants::{EVENT_NEW_MESSAGE, EVENT_ONLINE_SET};
use parley_shared::ServerEvent;

use crate::cache::{ChatCache, Inbound};
use crate::error::Result;

/// What applying one server event changed in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    Presence { online: usize },
    Message(Inbound),
}

/// Decode one text frame. Events this client does not know are skipped
/// rather than treated as errors, so the server can add new ones.
pub fn decode_frame(text: &str) -> Result<Option<ServerEvent>> {
    let name = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(str::to_owned));

    match name.as_deref() {
        Some(EVENT_ONLINE_SET) | Some(EVENT_NEW_MESSAGE) => {
            Ok(Some(ServerEvent::from_json(text)?))
        }
        Some(other) => {
            debug!(event = other, "Skipping unknown event");
            Ok(None)
        }
        None => Ok(Some(ServerEvent::from_json(text)?)),
    }
}

pub fn apply(cache: &mut ChatCache, event: ServerEvent) -> CacheUpdate {
    match event {
        ServerEvent::OnlineSet(online) => {
            let count = online.len();
            cache.on_online_set(online);
            CacheUpdate::Presence { online: count }
        }
        ServerEvent::NewMessage(message) => CacheUpdate::Message(cache.on_new_message(message)),
    }
}
