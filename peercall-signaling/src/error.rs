use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("connection error: {0}")]
    ConnectionError(#[from] Box<tungstenite::error::Error>),
    #[error("timed out after {0:?} connecting to signaling server")]
    ConnectTimeout(Duration),
    #[error("disconnected")]
    Disconnected,
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("shutdown: {0}")]
    Shutdown(String),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}
