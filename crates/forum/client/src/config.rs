//! Client configuration.
//!
//! Every section has working defaults. A TOML document only needs the
//! fields it changes:
//!
//! ```toml
//! query_timeout_ms = 3000
//!
//! [reconnect]
//! max_attempts = 5
//!
//! [outbox]
//! max_items = 100
//! ```

use crate::DEFAULT_RELAYS;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Reconnection backoff for one relay.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Scheduled retries stop after this many consecutive failures
    /// (0 = never stop)
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            max_attempts: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Maximum number of queued events
    pub max_items: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "max_age_secs")]
    pub max_age: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileCacheConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "ttl_secs")]
    pub ttl: Duration,
    pub max_entries: usize,
    /// Persist through the key-value store when one is supplied
    pub persist: bool,
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            max_entries: 1000,
            persist: true,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Quiet period after the last event before a batch is delivered
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
        }
    }
}

/// Top-level client configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relays used after any user-configured ones
    pub default_relays: Vec<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "query_timeout_ms")]
    pub query_timeout: Duration,
    /// How long to wait for a relay's OK after publishing
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "publish_timeout_ms")]
    pub publish_timeout: Duration,
    /// Number of ingested entry ids remembered for deduplication
    pub dedupe_capacity: usize,
    /// Edits and deletions held while their target is unseen
    pub pending_capacity: usize,
    pub reconnect: ReconnectConfig,
    pub outbox: OutboxConfig,
    pub profiles: ProfileCacheConfig,
    pub subscriptions: SubscriptionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            query_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            dedupe_capacity: forum::DEFAULT_DEDUPE_CAPACITY,
            pending_capacity: forum::DEFAULT_PENDING_CAPACITY,
            reconnect: ReconnectConfig::default(),
            outbox: OutboxConfig::default(),
            profiles: ProfileCacheConfig::default(),
            subscriptions: SubscriptionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse from TOML; unspecified fields keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reconnect.multiplier.is_finite() || self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                self.reconnect.multiplier
            )));
        }
        if self.reconnect.initial_backoff > self.reconnect.max_backoff {
            return Err(ConfigError::Invalid(
                "reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms".to_string(),
            ));
        }
        if self.outbox.max_items == 0 {
            return Err(ConfigError::Invalid("outbox.max_items must be > 0".to_string()));
        }
        if self.profiles.max_entries == 0 {
            return Err(ConfigError::Invalid("profiles.max_entries must be > 0".to_string()));
        }
        Ok(())
    }
}
