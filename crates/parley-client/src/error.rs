use thiserror::Error;

use parley_shared::ParleyError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ParleyError),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("No conversation is open")]
    NoOpenConversation,
}

pub type Result<T> = std::result::Result<T, ClientError>;
