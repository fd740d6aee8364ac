//! Client error types

use crate::config::ConfigError;
use crate::signer::SignerError;
use crate::store::StoreError;
use crate::transport::TransportError;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid relay URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No relay accepted the write. The event was queued in the outbox and
    /// will be delivered when a relay comes back.
    #[error("Publish failed on every relay; {queued} deliveries queued: {reason}")]
    PublishQueued { queued: usize, reason: String },

    /// A relay refused the event itself
    #[error("Event rejected: {0}")]
    Rejected(String),

    /// No relays are configured for the requested operation
    #[error("No relays available")]
    NoRelays,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client has been shut down
    #[error("Client is shut down")]
    ShutDown,
}

impl ClientError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::PublishQueued { .. } => true,
            ClientError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
