//! Per-relay connection bookkeeping.
//!
//! Each endpoint moves through `Disconnected -> Connecting -> Connected`.
//! Any acknowledged read or write marks it connected; failures are
//! classified into permanent (stop retrying) and transient (retry after
//! exponential backoff, up to a maximum attempt count). A relay with a retry
//! scheduled is `Connecting`; one with none is `Disconnected`.

use crate::backoff::ExponentialBackoff;
use crate::config::ReconnectConfig;
use crate::timer::TimerSlot;
use crate::transport::{RelayTransport, TransportError};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of one relay's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayState {
    pub endpoint: String,
    pub state: ConnectionState,
    /// Set on resolution failures; no retries are scheduled until re-armed
    pub permanently_failed: bool,
    pub last_error: Option<String>,
    pub last_connected_at: Option<Instant>,
    pub last_disconnected_at: Option<Instant>,
    /// Consecutive failures since the last success or manual retry
    pub reconnect_attempts: u32,
    pub next_reconnect_at: Option<Instant>,
}

impl RelayState {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: ConnectionState::Disconnected,
            permanently_failed: false,
            last_error: None,
            last_connected_at: None,
            last_disconnected_at: None,
            reconnect_attempts: 0,
            next_reconnect_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn rearm(&mut self) {
        self.permanently_failed = false;
        self.reconnect_attempts = 0;
        self.next_reconnect_at = None;
    }
}

/// Relay lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The relay acknowledged something after not being connected
    Connected { url: String },
    Disconnected { url: String, error: String },
    /// Retries stopped for this relay
    PermanentlyFailed { url: String, error: String },
}

struct Inner {
    transport: Arc<dyn RelayTransport>,
    backoff: ExponentialBackoff,
    relays: RwLock<HashMap<String, RelayState>>,
    timers: Mutex<HashMap<String, TimerSlot>>,
    events_tx: broadcast::Sender<RelayEvent>,
    active: AtomicBool,
}

/// Owns the state machine for every known relay. Cheap to clone.
#[derive(Clone)]
pub struct RelayManager {
    inner: Arc<Inner>,
}

impl RelayManager {
    pub fn new(transport: Arc<dyn RelayTransport>, config: &ReconnectConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(Inner {
                transport,
                backoff: ExponentialBackoff::from_config(config),
                relays: RwLock::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                events_tx,
                active: AtomicBool::new(true),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn RelayTransport> {
        &self.inner.transport
    }

    /// Create bookkeeping for endpoints not yet known. Existing state is kept.
    pub fn register<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut relays = self.inner.relays.write();
        for url in urls {
            let url = url.as_ref();
            relays
                .entry(url.to_string())
                .or_insert_with(|| RelayState::new(url));
        }
    }

    /// Attempt a connection now.
    pub async fn connect(&self, url: &str) -> Result<(), TransportError> {
        {
            let mut relays = self.inner.relays.write();
            let state = relays
                .entry(url.to_string())
                .or_insert_with(|| RelayState::new(url));
            if state.permanently_failed {
                return Err(TransportError::Resolution(
                    state.last_error.clone().unwrap_or_else(|| url.to_string()),
                ));
            }
            if state.state == ConnectionState::Disconnected {
                state.state = ConnectionState::Connecting;
            }
        }

        debug!("Connecting to relay {}", url);
        let result = self.inner.transport.connect(url).await;
        match &result {
            Ok(()) => self.record_success(url),
            Err(e) => self.record_failure(url, e),
        }
        result
    }

    /// Connect every registered relay that is not permanently failed.
    pub async fn connect_all(&self) -> Vec<(String, Result<(), TransportError>)> {
        let urls: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|s| !s.permanently_failed)
            .map(|s| s.endpoint)
            .collect();

        let results = join_all(urls.iter().map(|url| self.connect(url))).await;
        urls.into_iter().zip(results).collect()
    }

    /// Mark a relay connected after any acknowledged read or write.
    pub fn record_success(&self, url: &str) {
        let became_connected = {
            let mut relays = self.inner.relays.write();
            let state = relays
                .entry(url.to_string())
                .or_insert_with(|| RelayState::new(url));
            let was_connected = state.is_connected();
            state.state = ConnectionState::Connected;
            state.rearm();
            state.last_error = None;
            if !was_connected {
                state.last_connected_at = Some(Instant::now());
            }
            !was_connected
        };
        self.cancel_timer(url);

        if became_connected {
            info!("Relay {} connected", url);
            let _ = self.inner.events_tx.send(RelayEvent::Connected {
                url: url.to_string(),
            });
        }
    }

    /// Record a failed operation and schedule a retry if appropriate.
    pub fn record_failure(&self, url: &str, error: &TransportError) {
        if error.proves_reachable() {
            self.record_success(url);
            return;
        }

        let retry_pending = self
            .inner
            .timers
            .lock()
            .get(url)
            .is_some_and(TimerSlot::is_pending);
        let message = error.to_string();

        let (was_connected, retry_delay) = {
            let mut relays = self.inner.relays.write();
            let state = relays
                .entry(url.to_string())
                .or_insert_with(|| RelayState::new(url));
            let was_connected = state.is_connected();
            state.last_error = Some(message.clone());
            if was_connected {
                state.last_disconnected_at = Some(Instant::now());
            }

            let retry_delay = if error.is_permanent() {
                state.permanently_failed = true;
                state.next_reconnect_at = None;
                None
            } else if retry_pending || state.permanently_failed {
                None
            } else {
                state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
                if self.exhausted(state.reconnect_attempts) {
                    state.next_reconnect_at = None;
                    None
                } else {
                    let delay = self.inner.backoff.delay_for(state.reconnect_attempts);
                    state.next_reconnect_at = Some(Instant::now() + delay);
                    Some((delay, state.reconnect_attempts))
                }
            };
            let retrying = self.inner.active.load(Ordering::SeqCst)
                && !state.permanently_failed
                && (retry_delay.is_some() || retry_pending);
            state.state = if retrying {
                ConnectionState::Connecting
            } else {
                ConnectionState::Disconnected
            };
            (was_connected, retry_delay)
        };

        if was_connected {
            warn!("Relay {} disconnected: {}", url, message);
            let _ = self.inner.events_tx.send(RelayEvent::Disconnected {
                url: url.to_string(),
                error: message.clone(),
            });
        }

        if error.is_permanent() {
            self.cancel_timer(url);
            warn!("Relay {} permanently failed: {}", url, message);
            let _ = self.inner.events_tx.send(RelayEvent::PermanentlyFailed {
                url: url.to_string(),
                error: message,
            });
            return;
        }

        match retry_delay {
            Some((delay, attempt)) => {
                debug!(
                    "Relay {} failed (attempt {}): {}; retrying in {:?}",
                    url, attempt, message, delay
                );
                self.schedule_retry(url, delay);
            }
            None if !retry_pending => {
                debug!("Relay {} failed, no retry scheduled: {}", url, message);
            }
            None => {}
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.inner
            .backoff
            .max_attempts()
            .is_some_and(|max| attempts >= max)
    }

    fn schedule_retry(&self, url: &str, delay: std::time::Duration) {
        if !self.inner.active.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let target = url.to_string();
        let mut timers = self.inner.timers.lock();
        timers.entry(url.to_string()).or_default().schedule(delay, move || async move {
            let Some(manager) = RelayManager::from_weak(&weak) else {
                return;
            };
            if !manager.inner.active.load(Ordering::SeqCst) {
                return;
            }
            let _ = manager.connect(&target).await;
        });
    }

    fn cancel_timer(&self, url: &str) {
        if let Some(timer) = self.inner.timers.lock().get(url) {
            timer.cancel();
        }
    }

    /// Manual retry: re-arm the relay, cancel any scheduled retry, and
    /// connect immediately.
    pub async fn retry(&self, url: &str) -> Result<(), TransportError> {
        self.inner.active.store(true, Ordering::SeqCst);
        self.cancel_timer(url);
        {
            let mut relays = self.inner.relays.write();
            relays
                .entry(url.to_string())
                .or_insert_with(|| RelayState::new(url))
                .rearm();
        }
        info!("Manual retry for relay {}", url);
        self.connect(url).await
    }

    /// Re-arm every relay and cancel all scheduled retries.
    pub fn reset_all(&self) {
        for timer in self.inner.timers.lock().values() {
            timer.cancel();
        }
        for state in self.inner.relays.write().values_mut() {
            state.rearm();
        }
    }

    /// Stop scheduling retries and mark every relay disconnected. The
    /// bookkeeping stays readable.
    pub fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        self.reset_all();
        let now = Instant::now();
        for state in self.inner.relays.write().values_mut() {
            if state.is_connected() {
                state.last_disconnected_at = Some(now);
            }
            state.state = ConnectionState::Disconnected;
        }
    }

    /// Resume scheduling retries after [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
    }

    pub fn state(&self, url: &str) -> Option<RelayState> {
        self.inner.relays.read().get(url).cloned()
    }

    /// All relays, ordered by endpoint.
    pub fn snapshot(&self) -> Vec<RelayState> {
        let mut states: Vec<RelayState> = self.inner.relays.read().values().cloned().collect();
        states.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        states
    }

    pub fn is_connected(&self, url: &str) -> bool {
        self.inner
            .relays
            .read()
            .get(url)
            .is_some_and(RelayState::is_connected)
    }

    pub fn is_permanently_failed(&self, url: &str) -> bool {
        self.inner
            .relays
            .read()
            .get(url)
            .is_some_and(|s| s.permanently_failed)
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .relays
            .read()
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    /// Whether a retry is currently scheduled for `url`.
    pub fn retry_pending(&self, url: &str) -> bool {
        self.inner
            .timers
            .lock()
            .get(url)
            .is_some_and(TimerSlot::is_pending)
    }
}
