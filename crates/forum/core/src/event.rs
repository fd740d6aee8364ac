//! The signed log entry and its NIP-01 serialization.
//!
//! This module provides:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Event serialization for hashing and id computation
//! - The kind numbers used by the forum
//! - Tag accessors shared by every parser
//!
//! Signing is not done here. Signed events come from an external signer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur while serializing events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A signed log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signer).
///
/// Every builder in this crate produces a template. The signer fills in the
/// pubkey, id and signature.
///
/// ```
/// use forum::{EventTemplate, KIND_TEXT_ENTRY};
///
/// let template = EventTemplate {
///     created_at: 1_700_000_000,
///     kind: KIND_TEXT_ENTRY,
///     tags: vec![vec!["title".to_string(), "Hello".to_string()]],
///     content: "First post".to_string(),
/// };
/// assert_eq!(template.kind, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Attach a pubkey, producing the unsigned event a signer hashes.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

pub const KIND_METADATA: u16 = 0;
pub const KIND_TEXT_ENTRY: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_DELETION: u16 = 5;
pub const KIND_VOTE: u16 = 7;
pub const KIND_REPORT: u16 = 1984;
pub const KIND_BOARD_DEFINITION: u16 = 34550;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, EventError> {
    if !is_hex_key(&event.pubkey) {
        return Err(EventError::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| EventError::Serialization(e.to_string()))
}

/// Compute the event id (hex sha256 of the canonical serialization).
pub fn event_id(event: &UnsignedEvent) -> Result<String, EventError> {
    let serialized = serialize_event(event)?;
    let hash = Sha256::digest(serialized.as_bytes());
    Ok(hex::encode(hash))
}

/// Check that a string is 64 lowercase hex characters.
pub fn is_hex_key(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

impl Event {
    /// First value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// First values of every tag with the given name, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }

    /// Whether a tag with this name is present (with or without a value).
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| !tag.is_empty() && tag[0] == name)
    }

    /// Whether `self` should win over `other` when both target the same field.
    ///
    /// Newer timestamp wins; on equal timestamps the greater id wins.
    pub fn supersedes(&self, other: &Event) -> bool {
        (self.created_at, self.id.as_str()) > (other.created_at, other.id.as_str())
    }
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| match b.created_at.cmp(&a.created_at) {
        std::cmp::Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn unsigned() -> UnsignedEvent {
        UnsignedEvent {
            pubkey: PUBKEY.to_string(),
            created_at: 1617932115,
            kind: KIND_TEXT_ENTRY,
            tags: vec![],
            content: "Hello, world!".to_string(),
        }
    }

    #[test]
    fn test_serialize_event_valid() {
        let serialized = serialize_event(&unsigned()).unwrap();
        let expected = format!("[0,\"{}\",1617932115,1,[],\"Hello, world!\"]", PUBKEY);
        assert_eq!(serialized, expected);
    }

    #[test]
    fn test_serialize_event_invalid_pubkey() {
        let mut event = unsigned();
        event.pubkey = "invalid".to_string();
        assert!(serialize_event(&event).is_err());

        event.pubkey = PUBKEY.to_uppercase();
        assert!(serialize_event(&event).is_err());
    }

    #[test]
    fn test_event_id_is_stable_hex() {
        let a = event_id(&unsigned()).unwrap();
        let b = event_id(&unsigned()).unwrap();
        assert_eq!(a, b);
        assert!(is_hex_key(&a));

        let mut changed = unsigned();
        changed.content = "Hello, world?".to_string();
        assert_ne!(event_id(&changed).unwrap(), a);
    }

    #[test]
    fn test_tag_accessors() {
        let event = Event {
            id: "id".to_string(),
            pubkey: PUBKEY.to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![
                vec!["t".to_string(), "rust".to_string()],
                vec!["t".to_string(), "nostr".to_string()],
                vec!["encrypted".to_string()],
                vec![],
            ],
            content: String::new(),
            sig: String::new(),
        };

        assert_eq!(event.tag_value("t"), Some("rust"));
        assert_eq!(event.tag_values("t").collect::<Vec<_>>(), vec!["rust", "nostr"]);
        assert!(event.has_tag("encrypted"));
        assert_eq!(event.tag_value("encrypted"), None);
        assert!(!event.has_tag("title"));
    }

    #[test]
    fn test_supersedes_breaks_ties_by_id() {
        let mut a = Event {
            id: "aaa".to_string(),
            pubkey: PUBKEY.to_string(),
            created_at: 5,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        let mut b = a.clone();
        b.id = "bbb".to_string();

        assert!(b.supersedes(&a));
        assert!(!a.supersedes(&b));

        a.created_at = 6;
        assert!(a.supersedes(&b));
        assert!(!a.supersedes(&a));
    }

    #[test]
    fn test_sort_events() {
        let make = |id: &str, created_at| Event {
            id: id.to_string(),
            pubkey: PUBKEY.to_string(),
            created_at,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        let mut events = vec![make("b", 1), make("c", 3), make("a", 1)];
        sort_events(&mut events);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
