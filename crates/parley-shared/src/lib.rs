//! # parley-shared
//!
//! Types shared by the Parley server and client: user and message
//! identifiers, the message record, the live-connection wire events and
//! protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ParleyError;
pub use protocol::ServerEvent;
pub use types::{Message, MessageId, UserId, UserProfile};
