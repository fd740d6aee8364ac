//! Live subscriptions with debounced batch delivery.
//!
//! Every subscription owns one stream fed by all of its relays and a
//! forwarding task. Arriving events are mapped, buffered, and delivered in
//! one batch once the stream has been quiet for the debounce window. An
//! end-of-stored-events marker flushes the buffer immediately.

use crate::message::Filter;
use crate::timer::TimerSlot;
use crate::transport::{RelayTransport, StreamItem, StreamSender, TransportError};
use forum::Event;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Receives each delivered batch.
pub type BatchCallback<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

/// Buffers items and hands them over after a quiet period.
pub struct Debouncer<T> {
    window: Duration,
    buffer: Arc<Mutex<Vec<T>>>,
    timer: TimerSlot,
    deliver: BatchCallback<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(window: Duration, deliver: BatchCallback<T>) -> Self {
        Self {
            window,
            buffer: Arc::new(Mutex::new(Vec::new())),
            timer: TimerSlot::new(),
            deliver,
        }
    }

    /// Buffer `items` and restart the quiet-period timer.
    pub fn push(&self, items: impl IntoIterator<Item = T>) {
        {
            let mut buffer = self.buffer.lock();
            let before = buffer.len();
            buffer.extend(items);
            if buffer.len() == before {
                return;
            }
        }

        let buffer = self.buffer.clone();
        let deliver = self.deliver.clone();
        self.timer.schedule(self.window, move || async move {
            let batch = mem::take(&mut *buffer.lock());
            if !batch.is_empty() {
                deliver(batch);
            }
        });
    }

    /// Deliver whatever is buffered now.
    pub fn flush(&self) {
        self.timer.cancel();
        let batch = mem::take(&mut *self.buffer.lock());
        if !batch.is_empty() {
            (self.deliver)(batch);
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }
}

/// Bookkeeping for one live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTracker {
    pub id: String,
    pub filters: Vec<Filter>,
    /// Relays this subscription should be open on
    pub relays: BTreeSet<String>,
}

impl SubscriptionTracker {
    pub fn new(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
            relays: BTreeSet::new(),
        }
    }

    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        self.relays.insert(relay_url.into());
    }

    pub fn remove_relay(&mut self, relay_url: &str) {
        self.relays.remove(relay_url);
    }

    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

struct ActiveSubscription {
    tracker: SubscriptionTracker,
    sink: StreamSender,
    task: JoinHandle<()>,
}

struct MuxInner {
    transport: Arc<dyn RelayTransport>,
    debounce: Duration,
    active: Mutex<HashMap<String, ActiveSubscription>>,
}

impl MuxInner {
    fn detach(&self, id: &str) -> Option<SubscriptionTracker> {
        let removed = self.active.lock().remove(id)?;
        removed.task.abort();
        Some(removed.tracker)
    }

    async fn unsubscribe_all(&self, tracker: &SubscriptionTracker) {
        join_all(
            tracker
                .relays
                .iter()
                .map(|url| self.transport.unsubscribe(url, &tracker.id)),
        )
        .await;
    }
}

/// Results of issuing a subscription on each relay.
pub type RelayResults = Vec<(String, Result<(), TransportError>)>;

/// Registry of live subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    inner: Arc<MuxInner>,
}

impl SubscriptionMultiplexer {
    pub fn new(transport: Arc<dyn RelayTransport>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                transport,
                debounce,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a subscription on `relays`. Each arriving event goes through
    /// `map`; its output is batched into `deliver`.
    pub async fn open<T, M>(
        &self,
        relays: &[String],
        filters: Vec<Filter>,
        mut map: M,
        deliver: BatchCallback<T>,
    ) -> (SubscriptionHandle, RelayResults)
    where
        T: Send + 'static,
        M: FnMut(Event) -> Vec<T> + Send + 'static,
    {
        let id = generate_subscription_id();
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamItem>();
        let debouncer = Debouncer::new(self.inner.debounce, deliver);

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    StreamItem::Event(event) => debouncer.push(map(event)),
                    StreamItem::Eose => debouncer.flush(),
                }
            }
            debouncer.flush();
            debug!("Subscription {} stream ended", task_id);
        });

        let mut tracker = SubscriptionTracker::new(id.clone(), filters.clone());
        for url in relays {
            tracker.add_relay(url.clone());
        }
        self.inner.active.lock().insert(
            id.clone(),
            ActiveSubscription {
                tracker,
                sink: tx.clone(),
                task,
            },
        );

        let results = join_all(
            relays
                .iter()
                .map(|url| self.inner.transport.subscribe(url, &id, &filters, tx.clone())),
        )
        .await;
        info!("Opened subscription {} on {} relays", id, relays.len());

        let handle = SubscriptionHandle {
            id,
            mux: Arc::downgrade(&self.inner),
            closed: false,
        };
        (handle, relays.iter().cloned().zip(results).collect())
    }

    /// Re-issue every subscription that includes `url`, e.g. after the relay
    /// reconnects.
    pub async fn resubscribe(&self, url: &str) -> RelayResults {
        let targets: Vec<(String, Vec<Filter>, StreamSender)> = self
            .inner
            .active
            .lock()
            .values()
            .filter(|a| a.tracker.has_relay(url))
            .map(|a| (a.tracker.id.clone(), a.tracker.filters.clone(), a.sink.clone()))
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for (id, filters, sink) in targets {
            debug!("Re-issuing subscription {} on {}", id, url);
            let result = self.inner.transport.subscribe(url, &id, &filters, sink).await;
            results.push((url.to_string(), result));
        }
        results
    }

    /// Close one subscription: stop delivery and unsubscribe on its relays.
    pub async fn close(&self, id: &str) -> bool {
        let Some(tracker) = self.inner.detach(id) else {
            return false;
        };
        self.inner.unsubscribe_all(&tracker).await;
        info!("Closed subscription {}", id);
        true
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.inner.active.lock().keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn tracker(&self, id: &str) -> Option<SubscriptionTracker> {
        self.inner.active.lock().get(id).map(|a| a.tracker.clone())
    }
}

/// Handle to a live subscription. Dropping it cancels the subscription.
pub struct SubscriptionHandle {
    id: String,
    mux: Weak<MuxInner>,
    closed: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the subscription is still delivering.
    pub fn is_active(&self) -> bool {
        self.mux
            .upgrade()
            .is_some_and(|mux| mux.active.lock().contains_key(&self.id))
    }

    /// Cancel the stream and any pending batch, then unsubscribe on every relay.
    pub async fn close(mut self) {
        self.closed = true;
        if let Some(mux) = self.mux.upgrade()
            && let Some(tracker) = mux.detach(&self.id)
        {
            mux.unsubscribe_all(&tracker).await;
            info!("Closed subscription {}", self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(mux) = self.mux.upgrade() else {
            return;
        };
        let Some(tracker) = mux.detach(&self.id) else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                mux.unsubscribe_all(&tracker).await;
            });
        }
    }
}
