//! Single-fire, cancel-safe, reschedulable timer.
//!
//! Scheduling replaces whatever was pending. A generation counter guards the
//! window between a timer waking and it running its action, so a stale timer
//! never fires after being replaced or cancelled. A timer that fires detaches
//! itself from the slot first, so its action may reschedule the same slot
//! without aborting itself.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

#[derive(Debug, Default)]
struct SlotState {
    handle: Option<JoinHandle<()>>,
    generation: u64,
    deadline: Option<Instant>,
}

/// Holds at most one pending timer. Dropping the slot cancels it.
#[derive(Debug, Default)]
pub struct TimerSlot {
    state: Arc<Mutex<SlotState>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let deadline = Instant::now() + delay;
        state.deadline = Some(deadline);

        let slot = Arc::downgrade(&self.state);
        state.handle = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            {
                let Some(slot) = slot.upgrade() else {
                    return;
                };
                let mut state = slot.lock();
                if state.generation != generation {
                    return;
                }
                // Dropping a JoinHandle detaches the task without aborting it
                state.handle = None;
                state.deadline = None;
            }
            action().await;
        }));
    }

    /// Cancel the pending timer. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.deadline = None;
        match state.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// When the pending timer will fire.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.lock().deadline
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
