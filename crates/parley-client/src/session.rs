//! The live-connection subscription.
//!
//! A [`Session`] owns at most one reader task. Subscribing again aborts the
//! previous reader before the new one starts, and every forwarded event is
//! tagged with the generation that produced it so anything the old reader
//! queued before it was aborted can be told apart and dropped. A reader whose
//! stream ends on its own sends one final event with no payload.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use parley_shared::ServerEvent;

use crate::error::{ClientError, Result};
use crate::events::decode_frame;

/// An event together with the subscription generation that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    /// `None` once the subscription's stream has ended.
    pub event: Option<ServerEvent>,
}

pub struct Session {
    generation: u64,
    reader: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Create a session and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                generation: 0,
                reader: None,
                tx,
            },
            rx,
        )
    }

    /// Generation of the current subscription; 0 before the first one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_subscribed(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Replace the current subscription with one reading from `events`.
    /// Returns the new generation.
    pub fn subscribe<S>(&mut self, events: S) -> u64
    where
        S: Stream<Item = Result<ServerEvent>> + Send + 'static,
    {
        self.unsubscribe();

        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();

        self.reader = Some(tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        let event = Some(event);
                        if tx.send(SessionEvent { generation, event }).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(generation, error = %e, "Dropping undecodable event"),
                }
            }
            debug!(generation, "Event stream ended");
            let _ = tx.send(SessionEvent {
                generation,
                event: None,
            });
        }));

        generation
    }

    pub fn unsubscribe(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            debug!(generation = self.generation, "Unsubscribed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Open the relay WebSocket at `url` and expose its frames as events.
/// Non-text frames are skipped; the stream ends when the socket closes.
pub async fn connect_events(url: &str) -> Result<impl Stream<Item = Result<ServerEvent>>> {
    let (ws, _) = connect_async(url).await?;
    info!("Relay connection established");

    let (_write, read) = ws.split();
    Ok(read.filter_map(|frame| async move {
        match frame {
            Ok(WsMessage::Text(text)) => decode_frame(&text).transpose(),
            Ok(WsMessage::Close(frame)) => {
                debug!(?frame, "Relay closed the connection");
                None
            }
            Ok(_) => None,
            Err(e) => Some(Err(ClientError::from(e))),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use parley_shared::UserId;
    use std::time::Duration;

    fn online(ids: &[&str]) -> ServerEvent {
        ServerEvent::OnlineSet(ids.iter().map(|s| UserId::from(*s)).collect())
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_subscription_forwards_events() {
        let (mut session, mut rx) = Session::new();
        let (tx, events) = fmpsc::unbounded::<Result<ServerEvent>>();

        let generation = session.subscribe(events);
        assert_eq!(generation, 1);
        assert!(session.is_subscribed());

        tx.unbounded_send(Ok(online(&["u1"]))).unwrap();
        let got = recv(&mut rx).await.unwrap();
        assert_eq!(got.generation, 1);
        assert_eq!(got.event, Some(online(&["u1"])));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_reader() {
        let (mut session, mut rx) = Session::new();
        let (old_tx, old_events) = fmpsc::unbounded::<Result<ServerEvent>>();
        let (new_tx, new_events) = fmpsc::unbounded::<Result<ServerEvent>>();

        session.subscribe(old_events);
        let generation = session.subscribe(new_events);
        assert_eq!(generation, 2);

        // The old reader was aborted before it could poll again.
        let _ = old_tx.unbounded_send(Ok(online(&["stale"])));
        new_tx.unbounded_send(Ok(online(&["u2"]))).unwrap();

        let got = recv(&mut rx).await.unwrap();
        assert_eq!(got.generation, 2);
        assert_eq!(got.event, Some(online(&["u2"])));
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_events_do_not_end_subscription() {
        let (mut session, mut rx) = Session::new();
        let (tx, events) = fmpsc::unbounded::<Result<ServerEvent>>();
        session.subscribe(events);

        tx.unbounded_send(Err(ClientError::NotAuthenticated)).unwrap();
        tx.unbounded_send(Ok(online(&[]))).unwrap();
        assert_eq!(recv(&mut rx).await.unwrap().event, Some(online(&[])));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (mut session, mut rx) = Session::new();
        let (tx, events) = fmpsc::unbounded::<Result<ServerEvent>>();
        session.subscribe(events);
        session.unsubscribe();
        assert!(!session.is_subscribed());

        let _ = tx.unbounded_send(Ok(online(&["u1"])));
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_stream_end_is_reported() {
        let (mut session, mut rx) = Session::new();
        let (tx, events) = fmpsc::unbounded::<Result<ServerEvent>>();
        session.subscribe(events);

        tx.unbounded_send(Ok(online(&["u1"]))).unwrap();
        drop(tx);

        assert_eq!(recv(&mut rx).await.unwrap().event, Some(online(&["u1"])));
        let end = recv(&mut rx).await.unwrap();
        assert_eq!(end.generation, 1);
        assert_eq!(end.event, None);
    }
}
