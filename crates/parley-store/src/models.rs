//! Domain model structs persisted in the server database.

use chrono::{DateTime, Utc};

use parley_shared::{UserId, UserProfile};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account, including its password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Opaque user identifier (UUID v4 string assigned at signup).
    pub id: UserId,
    pub full_name: String,
    /// Unique, stored lower-cased.
    pub email: String,
    /// Argon2 PHC string. Never serialized.
    pub password_hash: String,
    pub bio: String,
    /// Image reference, empty when unset.
    pub profile_picture: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Public projection without credentials.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            profile_picture: self.profile_picture.clone(),
            created_at: self.created_at,
        }
    }
}

/// Fields required to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub bio: String,
}

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message about to be persisted. Identifier, timestamp and seen flag are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
}
