//! # parley-client
//!
//! Headless client for Parley. Talks to the REST API, holds the single
//! live-connection subscription and keeps [`cache::ChatCache`] (online set,
//! unseen counters, open conversation) consistent with the server.

pub mod api;
pub mod cache;
pub mod error;
pub mod events;
pub mod session;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use parley_shared::{Message, UserProfile};

pub use api::{ApiClient, ConnectMode, ProfileChanges, Sidebar};
pub use cache::{ChatCache, Inbound, PeerState};
pub use error::{ClientError, Result};
pub use events::CacheUpdate;

use crate::session::{Session, SessionEvent};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// How the live connection identifies itself.
    pub connect_mode: ConnectMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!(
                "http://localhost:{}",
                parley_shared::constants::DEFAULT_HTTP_PORT
            ),
            connect_mode: ConnectMode::Query,
        }
    }
}

/// A logged-in user's view of the chat.
pub struct ChatClient {
    api: ApiClient,
    config: ClientConfig,
    profile: UserProfile,
    cache: ChatCache,
    session: Session,
    events: UnboundedReceiver<SessionEvent>,
}

impl ChatClient {
    pub async fn login(config: ClientConfig, email: &str, password: &str) -> Result<Self> {
        let mut api = ApiClient::new(&config.base_url)?;
        let profile = api.login(email, password).await?;
        info!(user = %profile.id, "Logged in");
        Ok(Self::with_profile(api, config, profile))
    }

    pub async fn signup(
        config: ClientConfig,
        full_name: &str,
        email: &str,
        password: &str,
        bio: &str,
    ) -> Result<Self> {
        let mut api = ApiClient::new(&config.base_url)?;
        let profile = api.signup(full_name, email, password, bio).await?;
        info!(user = %profile.id, "Signed up");
        Ok(Self::with_profile(api, config, profile))
    }

    /// Resume a session from a stored token.
    pub async fn resume(config: ClientConfig, token: String) -> Result<Self> {
        let mut api = ApiClient::new(&config.base_url)?;
        api.set_token(Some(token));
        let profile = api.check().await?;
        Ok(Self::with_profile(api, config, profile))
    }

    fn with_profile(api: ApiClient, config: ClientConfig, profile: UserProfile) -> Self {
        let (session, events) = Session::new();
        Self {
            api,
            config,
            cache: ChatCache::new(profile.id.clone()),
            profile,
            session,
            events,
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn cache(&self) -> &ChatCache {
        &self.cache
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Open (or reopen) the live connection. Any previous subscription is
    /// replaced, never doubled.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.api.ws_url(&self.profile.id, self.config.connect_mode)?;
        let stream = session::connect_events(url.as_str()).await?;
        let generation = self.session.subscribe(stream);
        debug!(generation, "Live connection subscribed");
        Ok(())
    }

    /// Fetch the sidebar and seed the counters from the server.
    pub async fn refresh_peers(&mut self) -> Result<()> {
        let sidebar = self.api.sidebar().await?;
        self.cache.load_peers(sidebar.users, sidebar.unseen_messages);
        Ok(())
    }

    /// Open `peer`'s conversation and load its history.
    pub async fn open_conversation(&mut self, peer: &parley_shared::UserId) -> Result<()> {
        self.cache.select_peer(peer.clone());
        let history = self.api.conversation(peer).await?;
        self.cache.apply_history(peer, history);
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.cache.deselect();
    }

    /// Send to the open conversation.
    pub async fn send(&mut self, text: Option<&str>, image: Option<&str>) -> Result<Message> {
        let peer = self
            .cache
            .open_peer()
            .cloned()
            .ok_or(ClientError::NoOpenConversation)?;
        let sent = self.api.send_message(&peer, text, image).await?;
        self.cache.record_sent(sent.clone());
        Ok(sent)
    }

    pub async fn update_profile(&mut self, changes: &ProfileChanges) -> Result<&UserProfile> {
        self.profile = self.api.update_profile(changes).await?;
        Ok(&self.profile)
    }

    /// Whether the live connection is still being read.
    pub fn is_connected(&self) -> bool {
        self.session.is_subscribed()
    }

    /// Wait for the next live event and apply it. Messages appended to the
    /// open conversation are marked seen on the server. Returns `None` once
    /// the live connection has ended; call [`Self::connect`] to resume.
    pub async fn next_update(&mut self) -> Option<CacheUpdate> {
        if self.session.generation() == 0 {
            return None;
        }
        loop {
            let SessionEvent { generation, event } = self.events.recv().await?;
            if generation != self.session.generation() {
                debug!(generation, "Dropping event from replaced subscription");
                continue;
            }
            let Some(event) = event else {
                info!(generation, "Live connection ended");
                return None;
            };

            let update = events::apply(&mut self.cache, event);
            if let CacheUpdate::Message(Inbound::Appended { mark_seen }) = update {
                if let Err(e) = self.api.mark_seen(mark_seen).await {
                    warn!(msg = %mark_seen, error = %e, "Failed to mark message seen");
                }
            }
            return Some(update);
        }
    }

    /// Drop the live connection and forget all cached state.
    pub fn logout(mut self) {
        self.session.unsubscribe();
        self.cache.reset();
        self.api.set_token(None);
        info!(user = %self.profile.id, "Logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use futures::channel::mpsc as fmpsc;
    use parley_shared::{ServerEvent, UserId};

    fn client(me: &str) -> ChatClient {
        let config = ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            connect_mode: ConnectMode::Query,
        };
        let api = ApiClient::new(&config.base_url).unwrap();
        let profile = UserProfile {
            id: UserId::from(me),
            full_name: me.to_uppercase(),
            email: format!("{me}@example.com"),
            bio: String::new(),
            profile_picture: String::new(),
            created_at: Utc::now(),
        };
        ChatClient::with_profile(api, config, profile)
    }

    fn online(ids: &[&str]) -> ServerEvent {
        ServerEvent::OnlineSet(ids.iter().map(|s| UserId::from(*s)).collect())
    }

    async fn next(client: &mut ChatClient) -> Option<CacheUpdate> {
        tokio::time::timeout(Duration::from_secs(1), client.next_update())
            .await
            .expect("next_update hung")
    }

    #[tokio::test]
    async fn test_next_update_without_connection() {
        let mut c = client("u2");
        assert!(!c.is_connected());
        assert_eq!(next(&mut c).await, None);
    }

    #[tokio::test]
    async fn test_next_update_drops_replaced_subscription() {
        let mut c = client("u2");

        let (old_tx, old_events) = fmpsc::unbounded::<Result<ServerEvent>>();
        c.session.subscribe(old_events);
        old_tx.unbounded_send(Ok(online(&["stale"]))).unwrap();
        // Let the first reader queue its event before it is replaced.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (new_tx, new_events) = fmpsc::unbounded::<Result<ServerEvent>>();
        c.session.subscribe(new_events);
        new_tx.unbounded_send(Ok(online(&["u1", "u2"]))).unwrap();

        assert_eq!(next(&mut c).await, Some(CacheUpdate::Presence { online: 2 }));
        assert!(!c.cache().is_online(&UserId::from("stale")));
        assert!(c.cache().is_online(&UserId::from("u1")));
    }

    #[tokio::test]
    async fn test_next_update_ends_with_connection() {
        let mut c = client("u2");
        let (tx, events) = fmpsc::unbounded::<Result<ServerEvent>>();
        c.session.subscribe(events);

        tx.unbounded_send(Ok(online(&["u2"]))).unwrap();
        drop(tx);

        assert_eq!(next(&mut c).await, Some(CacheUpdate::Presence { online: 1 }));
        assert_eq!(next(&mut c).await, None);
    }
}
