//! The public forum client.
//!
//! [`ForumClient`] owns every long-lived piece (relay bookkeeping, outbox,
//! profile cache, subscriptions, reconciled model) and ties them together:
//! publishes fan out to write relays and queue what fails, fetches race a
//! timeout per relay, and live subscriptions deliver reconciled changes in
//! debounced batches.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::outbox::{FlushReport, Outbox};
use crate::profile_cache::{ProfileCache, ProfileRecord, ProfileSource};
use crate::relay_manager::{RelayEvent, RelayManager, RelayState};
use crate::relays::{RelayEntry, RelayList, normalize_relay_url};
use crate::signer::{Signer, check_signed};
use crate::store::KeyValueStore;
use crate::subscription::{BatchCallback, SubscriptionHandle, SubscriptionMultiplexer};
use crate::transport::{ConnectionDropped, RelayTransport, TransportError};
use crate::websocket::WebSocketTransport;
use async_trait::async_trait;
use forum::{
    Entity, EntityChange, Event, EventTemplate, KIND_METADATA, ProfileEntry, ReconciliationEngine,
    parse_profile,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of a publish that reached at least one relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub event_id: String,
    /// Relays that acknowledged the event
    pub accepted: Vec<String>,
    /// Relays that will receive it from the outbox
    pub queued: Vec<String>,
    /// Relays that refused it, with their reason
    pub rejected: Vec<(String, String)>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn RelayTransport>,
    store: Option<Arc<dyn KeyValueStore>>,
    relays: RwLock<RelayList>,
    manager: RelayManager,
    outbox: Outbox,
    profiles: ProfileCache,
    subscriptions: SubscriptionMultiplexer,
    engine: Mutex<ReconciliationEngine>,
    listener: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl ClientInner {
    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ClientError::ShutDown);
        }
        Ok(())
    }

    /// Ingest entries, keeping the profile cache in step.
    fn ingest(&self, events: &[Event]) -> Vec<EntityChange> {
        let changes = self.engine.lock().ingest_all(events);
        for change in &changes {
            if let EntityChange::Profile(entry) = change {
                self.profiles.observe(entry);
            }
        }
        changes
    }

    async fn flush_relay(&self, url: &str) -> FlushReport {
        let report = self.outbox.flush(url, self.transport.as_ref()).await;
        if let Some(error) = &report.error {
            self.manager.record_failure(url, error);
        }
        report
    }

    /// Flush queued writes and re-issue subscriptions for a relay that just
    /// came back.
    async fn on_connected(&self, url: &str) {
        let report = self.flush_relay(url).await;
        if report.delivered > 0 {
            info!("Delivered {} queued events to {}", report.delivered, url);
        }
        for (url, result) in self.subscriptions.resubscribe(url).await {
            if let Err(e) = result {
                self.manager.record_failure(&url, &e);
            }
        }
    }

    fn record(&self, url: &str, result: &std::result::Result<(), TransportError>) {
        match result {
            Ok(()) => self.manager.record_success(url),
            Err(e) => self.manager.record_failure(url, e),
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = self.relays.read().save(store.as_ref()) {
            warn!("Failed to persist relay preferences: {}", e);
        }
        if let Err(e) = self.profiles.save(store.as_ref()) {
            warn!("Failed to persist profile cache: {}", e);
        }
    }

    async fn query_relays(&self, urls: &[String], filters: &[Filter]) -> Vec<Event> {
        let query_timeout = self.config.query_timeout;
        let results = join_all(urls.iter().map(|url| async move {
            let result = timeout(query_timeout, self.transport.query(url, filters)).await;
            (url, result)
        }))
        .await;

        let mut events = Vec::new();
        for (url, result) in results {
            match result {
                Ok(Ok(found)) => {
                    self.manager.record_success(url);
                    events.extend(found);
                }
                Ok(Err(e)) => {
                    debug!("Query on {} failed: {}", url, e);
                    self.manager.record_failure(url, &e);
                }
                Err(_) => {
                    debug!("Query on {} timed out after {:?}", url, query_timeout);
                }
            }
        }
        events
    }
}

/// Fetches profiles (kind 0) from the read relays.
struct RelayProfileSource {
    client: Weak<ClientInner>,
}

#[async_trait]
impl ProfileSource for RelayProfileSource {
    async fn fetch_profiles(&self, pubkeys: &[String]) -> Result<Vec<ProfileEntry>> {
        let client = self.client.upgrade().ok_or(ClientError::ShutDown)?;
        let relays = client.relays.read().read_relays();
        let filter = Filter::new()
            .kinds(vec![KIND_METADATA])
            .authors(pubkeys.to_vec());
        let events = client.query_relays(&relays, &[filter]).await;
        Ok(events
            .iter()
            .filter_map(|event| parse_profile(event).ok())
            .collect())
    }
}

async fn next_drop(
    dropped: &mut Option<broadcast::Receiver<ConnectionDropped>>,
) -> std::result::Result<ConnectionDropped, RecvError> {
    match dropped {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Forum client over a set of relays. Cheap to clone.
#[derive(Clone)]
pub struct ForumClient {
    inner: Arc<ClientInner>,
}

impl ForumClient {
    /// Create a client. Nothing is connected until [`init`](Self::init) or
    /// the first operation that needs a relay.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn RelayTransport>,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let relays = RelayList::new(&config.default_relays);
        let manager = RelayManager::new(transport.clone(), &config.reconnect);
        manager.register(relays.urls());

        Ok(Self {
            inner: Arc::new(ClientInner {
                outbox: Outbox::new(config.outbox.clone()),
                profiles: ProfileCache::new(config.profiles.clone()),
                subscriptions: SubscriptionMultiplexer::new(
                    transport.clone(),
                    config.subscriptions.debounce,
                ),
                engine: Mutex::new(ReconciliationEngine::with_limits(
                    config.dedupe_capacity,
                    config.pending_capacity,
                )),
                relays: RwLock::new(relays),
                manager,
                transport,
                store,
                config,
                listener: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Create a client that talks to relays over WebSockets.
    pub fn with_websocket(
        config: ClientConfig,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Result<Self> {
        let transport = Arc::new(WebSocketTransport::new(
            config.reconnect.connect_timeout,
            config.publish_timeout,
        ));
        Self::new(config, transport, store)
    }

    /// Load persisted state, start reacting to reconnects, and connect to
    /// every relay.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shut_down.store(false, Ordering::SeqCst);
        inner.manager.start();

        if let Some(store) = &inner.store {
            if let Err(e) = inner.relays.write().load(store.as_ref()) {
                warn!("Ignoring stored relay preferences: {}", e);
            }
            match inner.profiles.load(store.as_ref()) {
                Ok(count) => debug!("Restored {} profiles", count),
                Err(e) => warn!("Ignoring stored profile cache: {}", e),
            }
        }
        let urls = inner.relays.read().urls();
        inner.manager.register(&urls);

        self.start_listener();

        let results = inner.manager.connect_all().await;
        let connected = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!("Forum client initialized: {}/{} relays connected", connected, results.len());
        Ok(())
    }

    /// React to relay lifecycle: connections the transport saw drop are
    /// recorded as failures (scheduling a reconnect), and relays that come
    /// back get their outbox flushed and subscriptions re-issued.
    fn start_listener(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let mut events = self.inner.manager.subscribe_events();
        let mut dropped = self.inner.transport.dropped_connections();
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(RelayEvent::Connected { url }) => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            inner.on_connected(&url).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Relay event listener lagged by {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    report = next_drop(&mut dropped) => match report {
                        Ok(ConnectionDropped { url, error }) => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            if inner.ensure_running().is_ok() {
                                inner.manager.record_failure(&url, &error);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {} dropped-connection reports", skipped);
                        }
                        Err(RecvError::Closed) => dropped = None,
                    },
                }
            }
        }));
    }

    /// Persist caches, close subscriptions, cancel timers and disconnect.
    /// Relay bookkeeping is reset but stays readable.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.persist();
        inner.subscriptions.close_all().await;
        if let Some(task) = inner.listener.lock().take() {
            task.abort();
        }
        inner.manager.shutdown();
        let urls: Vec<String> = inner
            .manager
            .snapshot()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        join_all(urls.iter().map(|url| inner.transport.disconnect(url))).await;
        info!("Forum client shut down");
    }

    /// Publish a signed event to the write relays.
    ///
    /// Succeeds if any relay accepts it; relays that could not be reached get
    /// it later from the outbox. Fails with a retryable
    /// [`ClientError::PublishQueued`] when no relay accepted it. The event
    /// joins the local model unless every relay rejected it.
    pub async fn publish(&self, event: &Event) -> Result<PublishOutcome> {
        let inner = &self.inner;
        inner.ensure_running()?;

        let targets = self.publish_targets();
        if targets.is_empty() {
            return Err(ClientError::NoRelays);
        }

        let results = join_all(
            targets
                .iter()
                .map(|url| inner.transport.publish(url, event)),
        )
        .await;

        let mut outcome = PublishOutcome {
            event_id: event.id.clone(),
            ..Default::default()
        };
        let mut last_error = None;
        for (url, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    inner.manager.record_success(&url);
                    outcome.accepted.push(url);
                }
                Err(TransportError::Rejected(reason)) => {
                    inner.manager.record_success(&url);
                    warn!("Relay {} rejected event {}: {}", url, event.id, reason);
                    outcome.rejected.push((url, reason));
                }
                Err(e) => {
                    debug!("Publish of {} to {} failed: {}", event.id, url, e);
                    inner.manager.record_failure(&url, &e);
                    last_error = Some(e);
                    outcome.queued.push(url);
                }
            }
        }

        if outcome.accepted.is_empty() && outcome.queued.is_empty() {
            // Refused everywhere: keep it out of the model, and ignore echoes
            inner.engine.lock().mark_processed(&event.id);
        } else {
            inner.ingest(std::slice::from_ref(event));
        }

        inner.outbox.enqueue(event, outcome.queued.iter().cloned());
        join_all(outcome.accepted.iter().map(|url| inner.flush_relay(url))).await;

        if !outcome.accepted.is_empty() {
            info!(
                "Published {} to {} relays ({} queued)",
                event.id,
                outcome.accepted.len(),
                outcome.queued.len()
            );
            return Ok(outcome);
        }
        if let Some(error) = last_error {
            return Err(ClientError::PublishQueued {
                queued: outcome.queued.len(),
                reason: error.to_string(),
            });
        }
        let reasons: Vec<String> = outcome
            .rejected
            .iter()
            .map(|(url, reason)| format!("{}: {}", url, reason))
            .collect();
        Err(ClientError::Rejected(reasons.join("; ")))
    }

    /// Sign `template` and publish the result.
    pub async fn publish_template(
        &self,
        signer: &dyn Signer,
        template: EventTemplate,
    ) -> Result<Event> {
        self.inner.ensure_running()?;
        let event = signer.sign(template.clone()).await?;
        check_signed(&template, &event)?;
        self.publish(&event).await?;
        Ok(event)
    }

    /// Write relays not known to be permanently unreachable, or all write
    /// relays when every one of them is.
    fn publish_targets(&self) -> Vec<String> {
        let write = self.inner.relays.read().write_relays();
        let usable: Vec<String> = write
            .iter()
            .filter(|url| !self.inner.manager.is_permanently_failed(url))
            .cloned()
            .collect();
        if usable.is_empty() { write } else { usable }
    }

    /// Query the read relays and return the entities the results refer to.
    ///
    /// Each relay gets `query_timeout`; a relay that fails or times out
    /// contributes nothing instead of failing the call.
    pub async fn fetch(&self, filters: Vec<Filter>) -> Result<Vec<Entity>> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let relays = inner.relays.read().read_relays();
        if relays.is_empty() {
            return Err(ClientError::NoRelays);
        }

        let mut events = inner.query_relays(&relays, &filters).await;
        forum::sort_events(&mut events);
        events.dedup_by(|a, b| a.id == b.id);
        inner.ingest(&events);

        let engine = inner.engine.lock();
        let mut seen = HashSet::new();
        Ok(events
            .iter()
            .filter_map(|event| engine.resolve(event))
            .filter(|entity| seen.insert(entity.key()))
            .collect())
    }

    /// Open a live subscription on the read relays. `on_batch` receives the
    /// reconciled changes in debounced batches. Dropping the handle cancels
    /// the subscription.
    pub async fn subscribe<F>(&self, filters: Vec<Filter>, on_batch: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Vec<EntityChange>) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.ensure_running()?;
        let relays = inner.relays.read().read_relays();
        if relays.is_empty() {
            return Err(ClientError::NoRelays);
        }

        let weak = Arc::downgrade(inner);
        let map = move |event: Event| match weak.upgrade() {
            Some(inner) => inner.ingest(std::slice::from_ref(&event)),
            None => Vec::new(),
        };
        let deliver: BatchCallback<EntityChange> = Arc::new(on_batch);
        let (handle, results) = inner.subscriptions.open(&relays, filters, map, deliver).await;
        for (url, result) in &results {
            inner.record(url, result);
        }
        Ok(handle)
    }

    /// Profiles for `pubkeys`, served from cache when fresh.
    pub async fn profiles(&self, pubkeys: &[String]) -> Result<HashMap<String, ProfileRecord>> {
        self.inner.ensure_running()?;
        let source = Arc::new(RelayProfileSource {
            client: Arc::downgrade(&self.inner),
        });
        Ok(self.inner.profiles.fetch(pubkeys, source).await)
    }

    /// Cached display name or a short form of the key. Never waits.
    pub fn display_name(&self, pubkey: &str) -> String {
        self.inner.profiles.display_name(pubkey)
    }

    /// The effective relay list: user entries, then defaults.
    pub fn relays(&self) -> Vec<RelayEntry> {
        self.inner.relays.read().entries()
    }

    /// Replace the user's relay entries, persist them and connect new ones.
    pub async fn set_relays(&self, entries: Vec<RelayEntry>) -> Result<()> {
        let inner = &self.inner;
        let urls = {
            let mut relays = inner.relays.write();
            relays.set_user_entries(entries);
            relays.urls()
        };
        self.after_relay_change(urls).await
    }

    /// Add or update one user relay entry.
    pub async fn add_relay(&self, url: &str, read: bool, write: bool) -> Result<()> {
        let urls = {
            let mut relays = self.inner.relays.write();
            relays.add(url, read, write)?;
            relays.urls()
        };
        self.after_relay_change(urls).await
    }

    pub async fn remove_relay(&self, url: &str) -> Result<bool> {
        let (removed, urls) = {
            let mut relays = self.inner.relays.write();
            let removed = relays.remove(url);
            (removed, relays.urls())
        };
        self.after_relay_change(urls).await?;
        Ok(removed)
    }

    async fn after_relay_change(&self, urls: Vec<String>) -> Result<()> {
        let inner = &self.inner;
        if let Some(store) = &inner.store {
            inner.relays.read().save(store.as_ref())?;
        }
        let known: HashSet<String> = inner
            .manager
            .snapshot()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        let new: Vec<String> = urls.into_iter().filter(|u| !known.contains(u)).collect();
        inner.manager.register(&new);
        if !inner.shut_down.load(Ordering::SeqCst) {
            join_all(new.iter().map(|url| inner.manager.connect(url))).await;
        }
        Ok(())
    }

    /// Manually retry a relay: reset its backoff, reconnect now, then
    /// deliver its queued writes and re-issue its subscriptions.
    pub async fn retry_relay(&self, url: &str) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        let url = normalize_relay_url(url)?;
        inner.manager.retry(&url).await?;
        inner.on_connected(&url).await;
        Ok(())
    }

    /// Re-arm every relay and reconnect all of them.
    pub async fn retry_all(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;
        inner.manager.reset_all();
        let results = inner.manager.connect_all().await;
        for (url, result) in results {
            if result.is_ok() {
                inner.on_connected(&url).await;
            }
        }
        Ok(())
    }

    /// Per-relay status, ordered by endpoint.
    pub fn relay_status(&self) -> Vec<RelayState> {
        self.inner.manager.snapshot()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.manager.connected_count()
    }

    /// Pending (event, relay) deliveries in the outbox.
    pub fn queued_count(&self) -> usize {
        self.inner.outbox.queued_count()
    }

    /// Events in the outbox.
    pub fn queued_events(&self) -> usize {
        self.inner.outbox.len()
    }

    pub fn relay_manager(&self) -> &RelayManager {
        &self.inner.manager
    }

    /// Read access to the reconciled model.
    pub fn with_engine<R>(&self, f: impl FnOnce(&ReconciliationEngine) -> R) -> R {
        f(&self.inner.engine.lock())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}
