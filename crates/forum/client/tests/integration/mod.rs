//! Integration tests for the forum client against in-memory relays
//!
//! These tests drive `ForumClient` end to end over `MemoryTransport`, with
//! tokio's paused clock standing in for real time.

pub mod fetch;
pub mod lifecycle;
pub mod profiles;
pub mod publish;
pub mod reconciliation;
pub mod subscriptions;

use async_trait::async_trait;
use forum::{BoardRef, Event, EventTemplate, NewPost, build_post, event_id};
use forum_client::{ClientConfig, ForumClient, MemoryTransport, Signer, SignerError};
use std::sync::{Arc, Once};

pub const RELAY_A: &str = "wss://relay-a.example";
pub const RELAY_B: &str = "wss://relay-b.example";
pub const RELAY_C: &str = "wss://relay-c.example";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Signs with a fixed identity. Ids are real event hashes; signatures are
/// placeholders since nothing here verifies them.
pub struct TestSigner {
    pubkey: String,
}

impl TestSigner {
    pub fn new(fill: char) -> Self {
        Self {
            pubkey: fill.to_string().repeat(64),
        }
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn sign_now(&self, template: EventTemplate) -> Event {
        let unsigned = template.into_unsigned(self.pubkey.clone());
        let id = event_id(&unsigned).unwrap();
        Event {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: "0".repeat(128),
        }
    }
}

#[async_trait]
impl Signer for TestSigner {
    async fn public_key(&self) -> Result<String, SignerError> {
        Ok(self.pubkey.clone())
    }

    async fn sign(&self, template: EventTemplate) -> Result<Event, SignerError> {
        Ok(self.sign_now(template))
    }
}

pub fn board() -> BoardRef {
    BoardRef::new("f".repeat(64), "rust")
}

pub fn post(signer: &TestSigner, title: &str, created_at: u64) -> Event {
    let new = NewPost::new(board(), title, format!("{} body", title));
    signer.sign_now(build_post(&new, created_at))
}

pub fn test_config(relays: &[&str]) -> ClientConfig {
    ClientConfig {
        default_relays: relays.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// A client over fresh in-memory relays.
pub fn test_client(relays: &[&str]) -> (ForumClient, Arc<MemoryTransport>) {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let client = ForumClient::new(test_config(relays), transport.clone(), None).unwrap();
    (client, transport)
}
