//! Direct-message routes: sidebar, conversation fetch, mark-seen and send.
//!
//! Sending persists first and only then hands the stored record to the
//! relay, so a message is never pushed live unless a later fetch would
//! also return it. Both steps run under the store lock, so messages are
//! pushed in the order they were stored.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use parley_shared::{Message, MessageId, UserId, UserProfile};
use parley_store::{NewMessage, StoreError};

use crate::api::{load_caller, AppState};
use crate::auth::AuthUser;
use crate::error::ServerError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarResponse {
    success: bool,
    users: Vec<UserProfile>,
    unseen_messages: HashMap<UserId, u32>,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    success: bool,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
pub struct SendRequest {
    text: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    success: bool,
    new_msg: Message,
}

/// Every other user plus the caller's non-zero unseen counts per sender.
pub async fn sidebar_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SidebarResponse>, ServerError> {
    let me = load_caller(&state, &auth).await?.id;

    let (users, unseen_messages) = state
        .with_db(move |db| {
            let users = db.list_users_except(&me)?;
            let unseen = db.unseen_counts_for(&me)?;
            Ok((users, unseen))
        })
        .await?;

    Ok(Json(SidebarResponse {
        success: true,
        users: users.iter().map(|u| u.profile()).collect(),
        unseen_messages,
    }))
}

/// Full conversation with `peer`, oldest first. Everything `peer` sent the
/// caller is marked seen before the read, so the response already reflects
/// it.
pub async fn conversation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(peer): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let me = load_caller(&state, &auth).await?.id;
    let peer = UserId::parse(&peer)
        .ok_or_else(|| ServerError::BadRequest("Missing user id".into()))?;

    let messages = state
        .with_db(move |db| {
            let marked = db.mark_conversation_seen(&peer, &me)?;
            if marked > 0 {
                debug!(from = %peer, to = %me, marked, "Conversation marked seen");
            }
            db.conversation(&me, &peer)
        })
        .await?;

    Ok(Json(ConversationResponse {
        success: true,
        messages,
    }))
}

/// Mark a single message seen. Only its receiver may do this.
pub async fn mark_seen(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let AuthUser(me) = auth;
    let id: MessageId = message_id
        .parse()
        .map_err(|_| ServerError::BadRequest("Invalid message id".into()))?;

    let allowed = state
        .with_db(move |db| {
            let message = db.get_message(id)?;
            if message.receiver_id != me {
                return Ok(false);
            }
            db.mark_message_seen(id)?;
            Ok(true)
        })
        .await
        .map_err(|e| match e {
            ServerError::Store(StoreError::NotFound) => {
                ServerError::NotFound("Message not found".into())
            }
            other => other,
        })?;

    if !allowed {
        return Err(ServerError::Forbidden(
            "Only the receiver can mark a message seen".into(),
        ));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Persist a message and push it to the receiver if connected.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(receiver): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let sender = load_caller(&state, &auth).await?.id;
    let receiver = UserId::parse(&receiver)
        .ok_or_else(|| ServerError::BadRequest("Missing receiver id".into()))?;

    let text = req
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let image_url = req.image.filter(|i| !i.trim().is_empty());

    if text.is_none() && image_url.is_none() {
        return Err(ServerError::BadRequest(
            "Message must have text or an image".into(),
        ));
    }

    let image = match image_url {
        Some(url) => Some(state.images.store_data_url(&url).await?),
        None => None,
    };

    let new = NewMessage {
        sender_id: sender,
        receiver_id: receiver,
        text,
        image: image.clone(),
    };

    // Routed while the store lock is held so pushes follow persistence order.
    let relay = state.relay.clone();
    let persisted = state
        .with_db(move |db| {
            let stored = db.create_message(&new)?;
            let outcome = relay.route(&stored);
            Ok((stored, outcome))
        })
        .await;

    let (stored, outcome) = match persisted {
        Ok(done) => done,
        Err(e) => {
            if let Some(reference) = image {
                if let Err(del) = state.images.delete_reference(&reference).await {
                    tracing::warn!(error = %del, "Failed to delete orphaned image");
                }
            }
            return Err(match e {
                ServerError::Store(StoreError::Constraint(_)) => {
                    ServerError::NotFound("Receiver not found".into())
                }
                other => other,
            });
        }
    };

    info!(
        msg = %stored.id,
        from = %stored.sender_id,
        to = %stored.receiver_id,
        ?outcome,
        "Message sent"
    );

    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            success: true,
            new_msg: stored,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{call, signup_user, test_state};
    use crate::relay::registry::Outbound;
    use parley_shared::ServerEvent;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn pushed_messages(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Frame(text) = item {
                if let Ok(ServerEvent::NewMessage(m)) = ServerEvent::from_json(&text) {
                    out.push(m);
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_send_routes_stored_record_to_online_receiver() {
        let (state, _dir) = test_state().await;
        let (alice, alice_token) = signup_user(&state, "Alice").await;
        let (bob, _) = signup_user(&state, "Bob").await;

        let (_bob_conn, mut bob_rx) = state.relay.connect(Some(UserId::from(bob.as_str())));

        let (status, body) = call(
            &state,
            "POST",
            &format!("/api/messages/send/{bob}"),
            Some(&alice_token),
            Some(json!({ "text": "hey" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let sent: Message = serde_json::from_value(body["newMsg"].clone()).unwrap();
        assert_eq!(sent.sender_id.as_str(), alice);
        assert!(!sent.seen);

        let pushed = pushed_messages(&mut bob_rx);
        assert_eq!(pushed, vec![sent]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_push_in_stored_order() {
        let (state, _dir) = test_state().await;
        let (alice, alice_token) = signup_user(&state, "Alice").await;
        let (bob, bob_token) = signup_user(&state, "Bob").await;

        let (_bob_conn, mut bob_rx) = state.relay.connect(Some(UserId::from(bob.as_str())));

        let mut sends = Vec::new();
        for i in 0..64 {
            let state = state.clone();
            let token = alice_token.clone();
            let uri = format!("/api/messages/send/{bob}");
            sends.push(tokio::spawn(async move {
                let (status, _) = call(
                    &state,
                    "POST",
                    &uri,
                    Some(&token),
                    Some(json!({ "text": format!("msg {i}") })),
                )
                .await;
                assert_eq!(status, StatusCode::CREATED);
            }));
        }
        for send in sends {
            send.await.unwrap();
        }

        let pushed: Vec<MessageId> = pushed_messages(&mut bob_rx).iter().map(|m| m.id).collect();

        let (_, body) = call(
            &state,
            "GET",
            &format!("/api/messages/{alice}"),
            Some(&bob_token),
            None,
        )
        .await;
        let stored: Vec<MessageId> = serde_json::from_value::<Vec<Message>>(body["messages"].clone())
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(stored.len(), 64);
        assert_eq!(pushed, stored);
    }

    #[tokio::test]
    async fn test_send_to_offline_receiver_is_fetched_later() {
        let (state, _dir) = test_state().await;
        let (alice, alice_token) = signup_user(&state, "Alice").await;
        let (bob, bob_token) = signup_user(&state, "Bob").await;

        let (status, _) = call(
            &state,
            "POST",
            &format!("/api/messages/send/{bob}"),
            Some(&alice_token),
            Some(json!({ "text": "are you there?" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = call(&state, "GET", "/api/messages/users", Some(&bob_token), None).await;
        assert_eq!(body["unseenMessages"][&alice], 1);
        assert_eq!(body["users"].as_array().unwrap().len(), 1);

        let (_, body) = call(
            &state,
            "GET",
            &format!("/api/messages/{alice}"),
            Some(&bob_token),
            None,
        )
        .await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "are you there?");
        assert_eq!(messages[0]["seen"], true);

        let (_, body) = call(&state, "GET", "/api/messages/users", Some(&bob_token), None).await;
        assert!(body["unseenMessages"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_unknown_receiver_is_not_routed() {
        let (state, _dir) = test_state().await;
        let (_, alice_token) = signup_user(&state, "Alice").await;

        // A live connection claiming an identity that has no account.
        let (_ghost_conn, mut ghost_rx) = state.relay.connect(Some(UserId::from("ghost")));

        let (status, body) = call(
            &state,
            "POST",
            "/api/messages/send/ghost",
            Some(&alice_token),
            Some(json!({ "text": "boo" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(pushed_messages(&mut ghost_rx).is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (state, _dir) = test_state().await;
        let (_, alice_token) = signup_user(&state, "Alice").await;
        let (bob, _) = signup_user(&state, "Bob").await;

        let (status, _) = call(
            &state,
            "POST",
            &format!("/api/messages/send/{bob}"),
            Some(&alice_token),
            Some(json!({ "text": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mark_seen_is_receiver_only() {
        let (state, _dir) = test_state().await;
        let (_, alice_token) = signup_user(&state, "Alice").await;
        let (bob, bob_token) = signup_user(&state, "Bob").await;

        let (_, body) = call(
            &state,
            "POST",
            &format!("/api/messages/send/{bob}"),
            Some(&alice_token),
            Some(json!({ "text": "read me" })),
        )
        .await;
        let id = body["newMsg"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/messages/mark/{id}");

        let (status, _) = call(&state, "PUT", &uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&state, "PUT", &uri, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let missing = format!("/api/messages/mark/{}", MessageId::new());
        let (status, _) = call(&state, "PUT", &missing, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, "PUT", "/api/messages/mark/nope", Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_image_message_persists_reference() {
        let (state, _dir) = test_state().await;
        let (_, alice_token) = signup_user(&state, "Alice").await;
        let (bob, _) = signup_user(&state, "Bob").await;

        let png = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";
        let (status, body) = call(
            &state,
            "POST",
            &format!("/api/messages/send/{bob}"),
            Some(&alice_token),
            Some(json!({ "image": format!("data:image/png;base64,{png}") })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert!(body["newMsg"].get("text").is_none());
        assert!(body["newMsg"]["image"]
            .as_str()
            .unwrap()
            .starts_with("/api/images/"));
    }
}
