//! # parley-store
//!
//! Persistent storage for the Parley server, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for user accounts and
//! direct messages, including the unseen-message counts the client uses to
//! seed its per-peer counters.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
