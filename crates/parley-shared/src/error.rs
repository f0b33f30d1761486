use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
