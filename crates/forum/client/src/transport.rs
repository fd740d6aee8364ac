//! The seam between relay bookkeeping and the wire.
//!
//! Everything above this trait (backoff, outbox, multiplexing) is transport
//! agnostic. [`crate::WebSocketTransport`] is the production implementation;
//! tests substitute an in-memory one.

use crate::message::Filter;
use async_trait::async_trait;
use forum::Event;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Failure talking to a relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection refused: {0}")]
    Refused(String),

    /// Hostname did not resolve. Retrying will not help.
    #[error("could not resolve host: {0}")]
    Resolution(String),

    /// The relay answered and refused the event.
    #[error("rejected by relay: {0}")]
    Rejected(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Failures that stop retries for the endpoint.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Resolution(_))
    }

    /// Failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::Refused(_)
                | TransportError::Closed(_)
                | TransportError::Other(_)
        )
    }

    /// Whether the relay was reachable when this error was produced.
    pub fn proves_reachable(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }

    /// Classify a free-form connection error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if [
            "failed to lookup address",
            "name or service not known",
            "nodename nor servname",
            "no such host",
            "dns error",
            "name resolution",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
        {
            TransportError::Resolution(message)
        } else if lower.contains("refused") {
            TransportError::Refused(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            TransportError::Timeout(message)
        } else if lower.contains("closed") || lower.contains("reset") {
            TransportError::Closed(message)
        } else {
            TransportError::Other(message)
        }
    }
}

/// Items delivered on a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(Event),
    /// End of stored events; live events may follow
    Eose,
}

pub type StreamSender = mpsc::UnboundedSender<StreamItem>;

/// A connection that ended without a local `disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDropped {
    pub url: String,
    pub error: TransportError,
}

/// A connection to a set of relays, addressed by normalized URL.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    /// Open (or confirm) the connection to `url`.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Close the connection to `url`, if any.
    async fn disconnect(&self, url: &str);

    /// Publish and wait for the relay's acknowledgement.
    async fn publish(&self, url: &str, event: &Event) -> Result<(), TransportError>;

    /// Fetch stored events matching `filters` up to end of stored events.
    async fn query(&self, url: &str, filters: &[Filter]) -> Result<Vec<Event>, TransportError>;

    /// Open a live subscription that delivers into `sink` until unsubscribed.
    async fn subscribe(
        &self,
        url: &str,
        subscription_id: &str,
        filters: &[Filter],
        sink: StreamSender,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, url: &str, subscription_id: &str);

    /// Notifications of connections the relay side dropped. Transports that
    /// hold no connection open between calls report nothing.
    fn dropped_connections(&self) -> Option<broadcast::Receiver<ConnectionDropped>> {
        None
    }
}
