use serde::{Deserialize, Serialize};

use crate::error::ParleyError;
use crate::types::{Message, UserId};

/// Events the server pushes over a live connection.
///
/// Encoded as JSON text frames of the form `{"event": ..., "data": ...}`.
/// The event names are part of the wire contract; see [`crate::constants`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full set of currently connected identities.
    #[serde(rename = "online-set")]
    OnlineSet(Vec<UserId>),

    /// A freshly persisted message addressed to the receiving connection.
    #[serde(rename = "new-message")]
    NewMessage(Message),
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ParleyError> {
        serde_json::to_string(self).map_err(|e| ParleyError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ParleyError> {
        serde_json::from_str(text).map_err(|e| ParleyError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EVENT_NEW_MESSAGE;
    use crate::types::MessageId;
    use chrono::Utc;

    #[test]
    fn test_online_set_frame() {
        let event = ServerEvent::OnlineSet(vec![UserId::from("u1"), UserId::from("u2")]);
        let json = event.to_json().unwrap();
        assert_eq!(json, r#"{"event":"online-set","data":["u1","u2"]}"#);
    }

    #[test]
    fn test_new_message_frame_carries_full_record() {
        let msg = Message {
            id: MessageId::new(),
            sender_id: UserId::from("u1"),
            receiver_id: UserId::from("u2"),
            text: None,
            image: Some("/api/images/abc".into()),
            seen: false,
            created_at: Utc::now(),
        };
        let json = ServerEvent::NewMessage(msg.clone()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], EVENT_NEW_MESSAGE);
        assert_eq!(value["data"]["image"], "/api/images/abc");

        match ServerEvent::from_json(&json).unwrap() {
            ServerEvent::NewMessage(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ServerEvent::from_json(r#"{"event":"typing","data":null}"#).is_err());
    }
}
