//! WebSocket endpoint for presence and live message delivery.
//!
//! Each socket is split in two: a writer task drains the connection's
//! outbound channel into the sink, and the reader loop watches for the
//! socket closing. Inbound application frames carry nothing the server acts
//! on; messages are sent over HTTP so they are stored before anyone sees
//! them.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::TokenRejection;
use crate::relay::registry::Outbound;

/// Sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?userId=<id> (or ?token=<jwt> in token mode)
///
/// A refused credential still upgrades, then closes immediately with a
/// 4001/4002 code so browser clients can tell why.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.identifier.identify(&params) {
        Ok(user) => ws.on_upgrade(move |socket| run_connection(socket, state, user)),
        Err(rejection) => {
            let (code, reason) = match rejection {
                TokenRejection::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                TokenRejection::Invalid => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            warn!(close_code = code, reason, "WebSocket identification failed");

            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}

async fn run_connection(socket: WebSocket, state: AppState, user: Option<UserId>) {
    let (sink, mut stream) = socket.split();
    let (handle, rx) = state.relay.connect(user);
    let connection = handle.id();

    let mut writer = tokio::spawn(writer_task(sink, rx));

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    debug!(connection, len = text.len(), "Ignoring inbound text frame");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(connection, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }

    state.relay.disconnect(&handle);
    writer.abort();
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if sink.send(Message::Text(text.to_string())).await.is_err() {
                    break;
                }
            }
            Outbound::Close(reason) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_SUPERSEDED,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
