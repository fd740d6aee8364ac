//! Offline outbox for signed writes that some relays have not acknowledged.
//!
//! Items are kept in enqueue order and delivered to each relay in that
//! order. The queue is bounded by item count (evicting the oldest tenth when
//! full) and by age (expired items are dropped, never re-delivered).

use crate::config::OutboxConfig;
use crate::transport::{RelayTransport, TransportError};
use forum::Event;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A signed event and the relays that still owe an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxItem {
    pub event: Event,
    pub pending: BTreeSet<String>,
    pub enqueued_at: Instant,
}

/// Result of one flush pass for one relay.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub delivered: usize,
    /// Deliveries the relay refused; these are not retried
    pub rejected: usize,
    pub expired: usize,
    /// The error that stopped the pass early, if any
    pub error: Option<TransportError>,
}

#[derive(Debug)]
pub struct Outbox {
    config: OutboxConfig,
    items: Mutex<VecDeque<OutboxItem>>,
    /// One flush at a time per relay
    flush_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Outbox {
    pub fn new(config: OutboxConfig) -> Self {
        Self {
            config,
            items: Mutex::new(VecDeque::new()),
            flush_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `event` for `targets`, merging with an existing item for the
    /// same event.
    pub fn enqueue<I, S>(&self, event: &Event, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets: BTreeSet<String> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut items = self.items.lock();
        if let Some(item) = items.iter_mut().find(|item| item.event.id == event.id) {
            item.pending.extend(targets);
            item.enqueued_at = now;
            return;
        }

        let capacity = self.config.max_items.max(1);
        if items.len() >= capacity {
            let evict = (capacity / 10).max(1);
            warn!("Outbox full ({} items), evicting {} oldest", items.len(), evict);
            let evict = evict.min(items.len());
            items.drain(..evict);
        }

        debug!("Queued event {} for {} relays", event.id, targets.len());
        items.push_back(OutboxItem {
            event: event.clone(),
            pending: targets,
            enqueued_at: now,
        });
    }

    /// Mark `url` as having acknowledged `event_id`.
    pub fn acknowledge(&self, event_id: &str, url: &str) {
        let mut items = self.items.lock();
        if let Some(item) = items.iter_mut().find(|item| item.event.id == event_id) {
            item.pending.remove(url);
        }
        items.retain(|item| !item.pending.is_empty());
    }

    /// Deliver everything still pending for `url`, oldest first. Stops at the
    /// first transport failure so later writes never overtake earlier ones.
    /// Concurrent flushes for the same relay run one after another.
    pub async fn flush(&self, url: &str, transport: &dyn RelayTransport) -> FlushReport {
        let lock = self
            .flush_locks
            .lock()
            .entry(url.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut report = FlushReport {
            expired: self.cleanup(),
            ..Default::default()
        };
        let batch: Vec<Event> = self
            .items
            .lock()
            .iter()
            .filter(|item| item.pending.contains(url))
            .map(|item| item.event.clone())
            .collect();

        for event in batch {
            match transport.publish(url, &event).await {
                Ok(()) => {
                    report.delivered += 1;
                    self.acknowledge(&event.id, url);
                }
                Err(TransportError::Rejected(reason)) => {
                    debug!("Relay {} rejected queued event {}: {}", url, event.id, reason);
                    report.rejected += 1;
                    self.acknowledge(&event.id, url);
                }
                Err(e) => {
                    debug!("Flush to {} stopped: {}", url, e);
                    report.error = Some(e);
                    break;
                }
            }
        }

        if report.delivered > 0 {
            debug!("Flushed {} queued events to {}", report.delivered, url);
        }
        report
    }

    /// Drop items older than the maximum age. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_age;
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| now.saturating_duration_since(item.enqueued_at) <= max_age);
        let dropped = before - items.len();
        if dropped > 0 {
            debug!("Dropped {} expired outbox items", dropped);
        }
        dropped
    }

    /// Pending (event, relay) deliveries.
    pub fn queued_count(&self) -> usize {
        self.items.lock().iter().map(|item| item.pending.len()).sum()
    }

    /// Deliveries pending for one relay.
    pub fn pending_for(&self, url: &str) -> usize {
        self.items
            .lock()
            .iter()
            .filter(|item| item.pending.contains(url))
            .count()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn items(&self) -> Vec<OutboxItem> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
