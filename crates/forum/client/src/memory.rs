//! In-memory relays.
//!
//! Implements [`RelayTransport`] without sockets: each relay is a vector of
//! stored events plus live subscriptions. Reachability, rejection and
//! latency are scriptable per relay, which makes it the transport of choice
//! for tests and offline use.

use crate::message::Filter;
use crate::transport::{
    ConnectionDropped, RelayTransport, StreamItem, StreamSender, TransportError,
};
use async_trait::async_trait;
use forum::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct MemoryRelay {
    failure: Option<TransportError>,
    rejection: Option<String>,
    latency: Duration,
    events: Vec<Event>,
    subscriptions: HashMap<String, (Vec<Filter>, StreamSender)>,
    /// Reached since the last failure or disconnect
    live: bool,
    connects: usize,
    publishes: usize,
}

impl MemoryRelay {
    fn check(&mut self) -> Result<(), TransportError> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => {
                self.live = true;
                Ok(())
            }
        }
    }

    fn matching(&self, filters: &[Filter]) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| filters.iter().any(|f| f.matches(e)))
            .cloned()
            .collect()
    }

    fn store(&mut self, event: Event) -> bool {
        if self.events.iter().any(|e| e.id == event.id) {
            return false;
        }
        self.subscriptions.retain(|_, (filters, sink)| {
            if filters.iter().any(|f| f.matches(&event)) {
                sink.send(StreamItem::Event(event.clone())).is_ok()
            } else {
                !sink.is_closed()
            }
        });
        self.events.push(event);
        true
    }
}

/// A set of in-memory relays addressed by URL. Unknown URLs behave as
/// empty, reachable relays.
pub struct MemoryTransport {
    relays: Mutex<HashMap<String, MemoryRelay>>,
    dropped_tx: broadcast::Sender<ConnectionDropped>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        let (dropped_tx, _) = broadcast::channel(100);
        Self {
            relays: Mutex::new(HashMap::new()),
            dropped_tx,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_relay<R>(&self, url: &str, f: impl FnOnce(&mut MemoryRelay) -> R) -> R {
        let mut relays = self.relays.lock();
        f(relays.entry(url.to_string()).or_default())
    }

    fn latency(&self, url: &str) -> Duration {
        self.with_relay(url, |r| r.latency)
    }

    /// Make every operation on `url` fail with `error`, or heal it with `None`.
    /// Breaking a relay drops its live subscriptions and, if it was reachable,
    /// reports the dropped connection.
    pub fn set_failure(&self, url: &str, error: Option<TransportError>) {
        let dropped = self.with_relay(url, |r| {
            let was_live = std::mem::take(&mut r.live);
            if error.is_some() {
                r.subscriptions.clear();
            }
            r.failure = error.clone();
            error.filter(|_| was_live)
        });
        if let Some(error) = dropped {
            let _ = self.dropped_tx.send(ConnectionDropped {
                url: url.to_string(),
                error,
            });
        }
    }

    /// Answer publishes with `OK false` and this message.
    pub fn set_rejection(&self, url: &str, message: Option<String>) {
        self.with_relay(url, |r| r.rejection = message);
    }

    /// Delay before the relay answers a publish or query.
    pub fn set_latency(&self, url: &str, latency: Duration) {
        self.with_relay(url, |r| r.latency = latency);
    }

    /// Store an event as if another client had published it. Live
    /// subscriptions see it immediately.
    pub fn inject(&self, url: &str, event: Event) {
        self.with_relay(url, |r| {
            r.store(event);
        });
    }

    pub fn stored(&self, url: &str) -> Vec<Event> {
        self.with_relay(url, |r| r.events.clone())
    }

    pub fn has_event(&self, url: &str, id: &str) -> bool {
        self.with_relay(url, |r| r.events.iter().any(|e| e.id == id))
    }

    pub fn connect_count(&self, url: &str) -> usize {
        self.with_relay(url, |r| r.connects)
    }

    /// Publish attempts that reached the relay, accepted or not.
    pub fn publish_count(&self, url: &str) -> usize {
        self.with_relay(url, |r| r.publishes)
    }

    pub fn subscription_count(&self, url: &str) -> usize {
        self.with_relay(url, |r| r.subscriptions.len())
    }
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        self.with_relay(url, |r| {
            r.connects += 1;
            r.check()
        })
    }

    async fn disconnect(&self, url: &str) {
        self.with_relay(url, |r| {
            r.live = false;
            r.subscriptions.clear();
        });
    }

    async fn publish(&self, url: &str, event: &Event) -> Result<(), TransportError> {
        let latency = self.latency(url);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.with_relay(url, |r| {
            r.check()?;
            r.publishes += 1;
            if let Some(message) = &r.rejection {
                return Err(TransportError::Rejected(message.clone()));
            }
            r.store(event.clone());
            Ok(())
        })
    }

    async fn query(&self, url: &str, filters: &[Filter]) -> Result<Vec<Event>, TransportError> {
        let latency = self.latency(url);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.with_relay(url, |r| {
            r.check()?;
            Ok(r.matching(filters))
        })
    }

    async fn subscribe(
        &self,
        url: &str,
        subscription_id: &str,
        filters: &[Filter],
        sink: StreamSender,
    ) -> Result<(), TransportError> {
        self.with_relay(url, |r| {
            r.check()?;
            for event in r.matching(filters) {
                let _ = sink.send(StreamItem::Event(event));
            }
            let _ = sink.send(StreamItem::Eose);
            r.subscriptions
                .insert(subscription_id.to_string(), (filters.to_vec(), sink));
            Ok(())
        })
    }

    async fn unsubscribe(&self, url: &str, subscription_id: &str) {
        self.with_relay(url, |r| {
            r.subscriptions.remove(subscription_id);
        });
    }

    fn dropped_connections(&self) -> Option<broadcast::Receiver<ConnectionDropped>> {
        Some(self.dropped_tx.subscribe())
    }
}
