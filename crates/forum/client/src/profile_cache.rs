//! Author display metadata cache.
//!
//! Entries expire after a TTL and the oldest are evicted past capacity.
//! Concurrent fetches for the same author share one in-flight request.

use crate::config::ProfileCacheConfig;
use crate::error::Result;
use crate::store::{KeyValueStore, load_json, save_json};
use async_trait::async_trait;
use forum::{ProfileEntry, ProfileMetadata, unix_now};
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Store key for the persisted cache.
pub const PROFILE_CACHE_KEY: &str = "profiles/cache";

/// Where profiles come from on a cache miss.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Newest known profile for each of `pubkeys`; unknown authors are omitted.
    async fn fetch_profiles(&self, pubkeys: &[String]) -> Result<Vec<ProfileEntry>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub pubkey: String,
    pub metadata: ProfileMetadata,
    /// Timestamp of the profile entry itself
    pub created_at: u64,
    /// Unix seconds when this record was cached
    pub cached_at: u64,
}

impl ProfileRecord {
    pub fn display_name(&self) -> String {
        self.metadata
            .best_name()
            .map(str::to_string)
            .unwrap_or_else(|| short_key(&self.pubkey))
    }
}

/// Deterministic fallback name: `first8…last4`.
pub fn short_key(pubkey: &str) -> String {
    if pubkey.len() <= 12 || !pubkey.is_ascii() {
        return pubkey.to_string();
    }
    format!("{}…{}", &pubkey[..8], &pubkey[pubkey.len() - 4..])
}

type Batch = Shared<BoxFuture<'static, Arc<HashMap<String, ProfileEntry>>>>;

pub struct ProfileCache {
    config: ProfileCacheConfig,
    records: Mutex<HashMap<String, ProfileRecord>>,
    pending: Mutex<HashMap<String, Batch>>,
}

impl ProfileCache {
    pub fn new(config: ProfileCacheConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, record: &ProfileRecord, now: u64) -> bool {
        now.saturating_sub(record.cached_at) < self.config.ttl.as_secs()
    }

    /// Fresh cached record.
    pub fn get(&self, pubkey: &str) -> Option<ProfileRecord> {
        self.get_at(pubkey, unix_now())
    }

    pub fn get_at(&self, pubkey: &str, now: u64) -> Option<ProfileRecord> {
        self.records
            .lock()
            .get(pubkey)
            .filter(|r| self.is_fresh(r, now))
            .cloned()
    }

    /// Cached name or the short-key fallback. Never waits on the network.
    pub fn display_name(&self, pubkey: &str) -> String {
        self.records
            .lock()
            .get(pubkey)
            .map(ProfileRecord::display_name)
            .unwrap_or_else(|| short_key(pubkey))
    }

    /// Record a profile seen elsewhere (e.g. on a live subscription).
    pub fn observe(&self, entry: &ProfileEntry) {
        self.insert_at(entry, unix_now());
    }

    /// Insert unless an entry with a newer profile timestamp is cached.
    pub fn insert_at(&self, entry: &ProfileEntry, now: u64) {
        let mut records = self.records.lock();
        if let Some(existing) = records.get_mut(&entry.pubkey)
            && existing.created_at > entry.created_at
        {
            existing.cached_at = now;
            return;
        }
        records.insert(
            entry.pubkey.clone(),
            ProfileRecord {
                pubkey: entry.pubkey.clone(),
                metadata: entry.metadata.clone(),
                created_at: entry.created_at,
                cached_at: now,
            },
        );
        self.evict(&mut records);
    }

    fn evict(&self, records: &mut HashMap<String, ProfileRecord>) {
        let max = self.config.max_entries.max(1);
        if records.len() <= max {
            return;
        }
        let mut by_age: Vec<(u64, String)> = records
            .values()
            .map(|r| (r.cached_at, r.pubkey.clone()))
            .collect();
        by_age.sort();
        let excess = records.len() - max;
        for (_, pubkey) in by_age.into_iter().take(excess) {
            records.remove(&pubkey);
        }
    }

    /// Profiles for `pubkeys`, fetching stale or missing ones through
    /// `source`. A failed fetch falls back to whatever is cached.
    pub async fn fetch(
        &self,
        pubkeys: &[String],
        source: Arc<dyn ProfileSource>,
    ) -> HashMap<String, ProfileRecord> {
        let now = unix_now();
        let wanted: HashSet<&String> = pubkeys.iter().collect();
        let mut batches: Vec<Batch> = Vec::new();

        {
            let records = self.records.lock();
            let mut pending = self.pending.lock();
            let mut missing = Vec::new();
            for pubkey in &wanted {
                if records.get(*pubkey).is_some_and(|r| self.is_fresh(r, now)) {
                    continue;
                }
                match pending.get(*pubkey) {
                    Some(batch) => {
                        if !batches.iter().any(|b| b.ptr_eq(batch)) {
                            batches.push(batch.clone());
                        }
                    }
                    None => missing.push((*pubkey).clone()),
                }
            }

            if !missing.is_empty() {
                debug!("Fetching {} profiles", missing.len());
                let batch = Self::batch(missing.clone(), source);
                for pubkey in missing {
                    pending.insert(pubkey, batch.clone());
                }
                batches.push(batch);
            }
        }

        let results = join_all(batches.iter().cloned()).await;
        let now = unix_now();
        for (batch, found) in batches.iter().zip(results) {
            for entry in found.values() {
                self.insert_at(entry, now);
            }
            self.pending.lock().retain(|_, b| !b.ptr_eq(batch));
        }

        let records = self.records.lock();
        wanted
            .into_iter()
            .filter_map(|pubkey| records.get(pubkey).map(|r| (pubkey.clone(), r.clone())))
            .collect()
    }

    fn batch(pubkeys: Vec<String>, source: Arc<dyn ProfileSource>) -> Batch {
        async move {
            match source.fetch_profiles(&pubkeys).await {
                Ok(entries) => {
                    let mut newest: HashMap<String, ProfileEntry> = HashMap::new();
                    for entry in entries {
                        if newest
                            .get(&entry.pubkey)
                            .is_none_or(|e| e.created_at < entry.created_at)
                        {
                            newest.insert(entry.pubkey.clone(), entry);
                        }
                    }
                    Arc::new(newest)
                }
                Err(e) => {
                    warn!("Profile fetch failed: {}", e);
                    Arc::new(HashMap::new())
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of in-flight coalesced requests, counted per author.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Load persisted records, dropping expired ones.
    pub fn load(&self, store: &dyn KeyValueStore) -> Result<usize> {
        self.load_at(store, unix_now())
    }

    pub fn load_at(&self, store: &dyn KeyValueStore, now: u64) -> Result<usize> {
        if !self.config.persist {
            return Ok(0);
        }
        let Some(saved) = load_json::<Vec<ProfileRecord>>(store, PROFILE_CACHE_KEY)? else {
            return Ok(0);
        };
        let mut records = self.records.lock();
        let mut loaded = 0;
        for record in saved.into_iter().filter(|r| self.is_fresh(r, now)) {
            if records
                .get(&record.pubkey)
                .is_none_or(|r| r.created_at <= record.created_at)
            {
                records.insert(record.pubkey.clone(), record);
                loaded += 1;
            }
        }
        self.evict(&mut records);
        debug!("Loaded {} cached profiles", loaded);
        Ok(loaded)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        if !self.config.persist {
            return Ok(());
        }
        let records: Vec<ProfileRecord> = self.records.lock().values().cloned().collect();
        save_json(store, PROFILE_CACHE_KEY, &records)?;
        Ok(())
    }
}
