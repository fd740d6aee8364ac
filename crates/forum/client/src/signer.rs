//! Signing capability.
//!
//! Key custody lives outside this crate. The client hands an
//! [`EventTemplate`] to a [`Signer`] and publishes whatever signed event
//! comes back.

use async_trait::async_trait;
use forum::{Event, EventTemplate};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("signing rejected: {0}")]
    Rejected(String),

    #[error("signer returned an invalid event: {0}")]
    InvalidEvent(String),
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Public key of the signing identity (64 hex chars).
    async fn public_key(&self) -> Result<String, SignerError>;

    /// Produce a signed event for `template`.
    async fn sign(&self, template: EventTemplate) -> Result<Event, SignerError>;
}

/// Check the parts of a signed event that do not need cryptography.
pub(crate) fn check_signed(template: &EventTemplate, event: &Event) -> Result<(), SignerError> {
    if event.kind != template.kind || event.tags != template.tags || event.content != template.content
    {
        return Err(SignerError::InvalidEvent(
            "signed event does not match its template".to_string(),
        ));
    }
    if !forum::is_hex_key(&event.id) || !forum::is_hex_key(&event.pubkey) {
        return Err(SignerError::InvalidEvent("malformed id or pubkey".to_string()));
    }
    Ok(())
}
