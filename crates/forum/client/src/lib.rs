//! Relay client for the forum event log.
//!
//! This crate provides:
//! - RelayTransport: the seam to relays, with a WebSocket and an in-memory implementation
//! - RelayManager: per-relay connection state, backoff and permanent-failure tracking
//! - Outbox: bounded queue of signed writes awaiting delivery
//! - ProfileCache: TTL cache of author profiles with request coalescing
//! - SubscriptionMultiplexer: live subscriptions with debounced delivery
//! - ForumClient: the facade tying these to the reconciled model in `forum`
//!
//! # Example
//!
//! ```rust,no_run
//! use forum::{BoardRef, Entity};
//! use forum_client::{ClientConfig, Filter, ForumClient};
//!
//! # async fn example() -> forum_client::Result<()> {
//! let client = ForumClient::with_websocket(ClientConfig::default(), None)?;
//! client.init().await?;
//!
//! let board = BoardRef::new("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798", "rust");
//! for entity in client.fetch(vec![Filter::board_posts(&board)]).await? {
//!     if let Entity::Post(post) = entity {
//!         println!("{} by {}", post.title, client.display_name(&post.author));
//!     }
//! }
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod config;
mod error;
mod memory;
mod message;
mod outbox;
mod profile_cache;
mod relay_manager;
mod relays;
mod signer;
mod store;
mod subscription;
mod timer;
mod transport;
mod websocket;

pub use backoff::ExponentialBackoff;
pub use client::{ForumClient, PublishOutcome};
pub use config::{
    ClientConfig, ConfigError, OutboxConfig, ProfileCacheConfig, ReconnectConfig,
    SubscriptionConfig,
};
pub use error::{ClientError, Result};
pub use memory::MemoryTransport;
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use outbox::{FlushReport, Outbox, OutboxItem};
pub use profile_cache::{PROFILE_CACHE_KEY, ProfileCache, ProfileRecord, ProfileSource, short_key};
pub use relay_manager::{ConnectionState, RelayEvent, RelayManager, RelayState};
pub use relays::{RELAY_PREFERENCES_KEY, RelayEntry, RelayList, normalize_relay_url};
pub use signer::{Signer, SignerError};
pub use store::{FileStore, KeyValueStore, MemoryStore, ScopedStore, StoreError, load_json, save_json};
pub use subscription::{
    BatchCallback, Debouncer, RelayResults, SubscriptionHandle, SubscriptionMultiplexer,
    SubscriptionTracker, generate_subscription_id,
};
pub use timer::TimerSlot;
pub use transport::{
    ConnectionDropped, RelayTransport, StreamItem, StreamSender, TransportError,
};
pub use websocket::WebSocketTransport;

/// Relays used when the user has configured none.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];
