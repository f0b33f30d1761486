//! Client-side mirror of presence and unseen-message counts.
//!
//! Each peer is in one of three states. At most one peer is open at a time,
//! and an open peer's unseen counter is always zero.
//!
//! ```text
//! NotLoaded ──load_peers──▶ LoadedClosed ◀──select other──┐
//!                               │                          │
//!                               └──select_peer──▶ LoadedOpen
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use parley_shared::{Message, MessageId, UserId, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NotLoaded,
    LoadedClosed,
    LoadedOpen,
}

/// What the cache did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The sender's conversation is open: the message was appended as seen
    /// and the caller should mark it seen on the server.
    Appended { mark_seen: MessageId },
    /// The sender's conversation is not open: its counter went up.
    Counted { unseen: u32 },
    /// Not addressed to this user.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct ChatCache {
    me: UserId,
    peers: Vec<UserProfile>,
    unseen: HashMap<UserId, u32>,
    open: Option<UserId>,
    conversation: Vec<Message>,
    online: BTreeSet<UserId>,
}

impl ChatCache {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            peers: Vec::new(),
            unseen: HashMap::new(),
            open: None,
            conversation: Vec::new(),
            online: BTreeSet::new(),
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn peer_state(&self, peer: &UserId) -> PeerState {
        if self.open.as_ref() == Some(peer) {
            PeerState::LoadedOpen
        } else if self.peers.iter().any(|p| &p.id == peer) {
            PeerState::LoadedClosed
        } else {
            PeerState::NotLoaded
        }
    }

    /// Replace the peer list and counters with what the server computed.
    /// The open conversation survives if its peer is still listed.
    pub fn load_peers(&mut self, users: Vec<UserProfile>, unseen: HashMap<UserId, u32>) {
        self.peers = users;
        self.unseen = unseen.into_iter().filter(|(_, n)| *n > 0).collect();

        if let Some(open) = self.open.clone() {
            if self.peers.iter().any(|p| p.id == open) {
                self.unseen.remove(&open);
            } else {
                debug!(peer = %open, "Open peer no longer listed, closing conversation");
                self.open = None;
                self.conversation.clear();
            }
        }
    }

    /// Open `peer`'s conversation. Clears its counter and the message buffer;
    /// the caller fetches history and feeds it to [`Self::apply_history`].
    pub fn select_peer(&mut self, peer: UserId) {
        self.unseen.remove(&peer);
        self.conversation.clear();
        self.open = Some(peer);
    }

    pub fn deselect(&mut self) {
        self.open = None;
        self.conversation.clear();
    }

    /// Install fetched history. Ignored if `peer` was closed while the fetch
    /// was in flight. Messages appended live during the fetch are kept when
    /// the history does not already contain them. Returns whether it was
    /// applied.
    pub fn apply_history(&mut self, peer: &UserId, messages: Vec<Message>) -> bool {
        if self.open.as_ref() != Some(peer) {
            return false;
        }
        let fetched: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
        let live: Vec<Message> = self
            .conversation
            .drain(..)
            .filter(|m| !fetched.contains(&m.id))
            .collect();

        self.conversation = messages;
        self.conversation.extend(live);
        self.conversation.sort_by_key(|m| m.created_at);
        true
    }

    /// Append a message this user just sent, if it belongs to the open
    /// conversation.
    pub fn record_sent(&mut self, message: Message) -> bool {
        let belongs = message.sender_id == self.me
            && self.open.as_ref() == Some(&message.receiver_id);
        if belongs {
            self.conversation.push(message);
        }
        belongs
    }

    pub fn on_new_message(&mut self, mut message: Message) -> Inbound {
        if message.receiver_id != self.me {
            return Inbound::Ignored;
        }

        let peer = message.sender_id.clone();
        if self.open.as_ref() == Some(&peer) {
            let id = message.id;
            message.seen = true;
            self.conversation.push(message);
            return Inbound::Appended { mark_seen: id };
        }

        let counter = self.unseen.entry(peer).or_insert(0);
        *counter += 1;
        Inbound::Counted { unseen: *counter }
    }

    /// Replace the online mirror wholesale.
    pub fn on_online_set(&mut self, online: Vec<UserId>) {
        self.online = online.into_iter().collect();
    }

    /// Logout: forget everything but the owner.
    pub fn reset(&mut self) {
        *self = Self::new(self.me.clone());
    }

    pub fn unseen(&self, peer: &UserId) -> u32 {
        self.unseen.get(peer).copied().unwrap_or(0)
    }

    pub fn unseen_counts(&self) -> &HashMap<UserId, u32> {
        &self.unseen
    }

    pub fn is_online(&self, peer: &UserId) -> bool {
        self.online.contains(peer)
    }

    pub fn online(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    pub fn peers(&self) -> &[UserProfile] {
        &self.peers
    }

    pub fn open_peer(&self) -> Option<&UserId> {
        self.open.as_ref()
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }
}
