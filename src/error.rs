//! Error types for the pendant gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pendant gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Realtime session error
    #[error("session error: {0}")]
    Session(String),

    /// Realtime transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Reconnect attempts exhausted; the session will not recover
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    /// Malformed or unexpected protocol payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Call signaling error
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Peer call error
    #[error("call error: {0}")]
    Call(String),

    /// Capability execution error
    #[error("capability error: {0}")]
    Capability(String),

    /// Music player process error
    #[error("music error: {0}")]
    Music(String),

    /// Push-to-talk button error
    #[error("button error: {0}")]
    Button(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
