//! Relay endpoint preferences.
//!
//! One ordered list drives both read and write sets: user-configured entries
//! first, then defaults not already listed. URLs are normalized so cosmetic
//! variants (case, trailing slash) do not create duplicates.

use crate::error::{ClientError, Result};
use crate::store::{KeyValueStore, load_json, save_json};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Store key for the user's relay entries.
pub const RELAY_PREFERENCES_KEY: &str = "relays/preferences";

/// Normalize a relay URL: ws/wss only, lowercase scheme and host, no
/// trailing slash.
pub fn normalize_relay_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;

    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::InvalidUrl(format!("{}: missing host", raw)));
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    pub url: String,
    pub read: bool,
    pub write: bool,
}

impl RelayEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read: true,
            write: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayList {
    user: Vec<RelayEntry>,
    defaults: Vec<RelayEntry>,
}

impl RelayList {
    /// Create a list with the given defaults and no user entries. Invalid
    /// defaults are skipped.
    pub fn new(defaults: &[String]) -> Self {
        let mut list = Self::default();
        for raw in defaults {
            match normalize_relay_url(raw) {
                Ok(url) if !list.defaults.iter().any(|e| e.url == url) => {
                    list.defaults.push(RelayEntry::new(url));
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring default relay {}: {}", raw, e),
            }
        }
        list
    }

    /// The effective list: user entries, then defaults not overridden.
    pub fn entries(&self) -> Vec<RelayEntry> {
        let mut entries = self.user.clone();
        for default in &self.defaults {
            if !entries.iter().any(|e| e.url == default.url) {
                entries.push(default.clone());
            }
        }
        entries
    }

    pub fn urls(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.url).collect()
    }

    pub fn read_relays(&self) -> Vec<String> {
        self.entries().into_iter().filter(|e| e.read).map(|e| e.url).collect()
    }

    pub fn write_relays(&self) -> Vec<String> {
        self.entries().into_iter().filter(|e| e.write).map(|e| e.url).collect()
    }

    pub fn user_entries(&self) -> &[RelayEntry] {
        &self.user
    }

    /// Add or update a user entry. Returns the normalized URL.
    pub fn add(&mut self, raw: &str, read: bool, write: bool) -> Result<String> {
        let url = normalize_relay_url(raw)?;
        match self.user.iter_mut().find(|e| e.url == url) {
            Some(entry) => {
                entry.read = read;
                entry.write = write;
            }
            None => self.user.push(RelayEntry {
                url: url.clone(),
                read,
                write,
            }),
        }
        Ok(url)
    }

    /// Remove a user entry. Defaults cannot be removed, only overridden.
    pub fn remove(&mut self, raw: &str) -> bool {
        let Ok(url) = normalize_relay_url(raw) else {
            return false;
        };
        let before = self.user.len();
        self.user.retain(|e| e.url != url);
        self.user.len() != before
    }

    /// Replace user entries, normalizing and de-duplicating them.
    pub fn set_user_entries(&mut self, entries: Vec<RelayEntry>) {
        self.user.clear();
        for entry in entries {
            if let Err(e) = self.add(&entry.url, entry.read, entry.write) {
                warn!("Ignoring relay preference {}: {}", entry.url, e);
            }
        }
    }

    /// Load user entries from the store.
    pub fn load(&mut self, store: &dyn KeyValueStore) -> Result<()> {
        if let Some(entries) = load_json::<Vec<RelayEntry>>(store, RELAY_PREFERENCES_KEY)? {
            self.set_user_entries(entries);
        }
        Ok(())
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        save_json(store, RELAY_PREFERENCES_KEY, &self.user)?;
        Ok(())
    }
}
