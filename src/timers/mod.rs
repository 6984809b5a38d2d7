//! Disconnect grace timers
//!
//! When a connection drops without an explicit leave, the membership is
//! kept for a grace period so the player can reconnect seamlessly. Each
//! identity has at most one pending timer.
//!
//! A timer moves through `Pending -> Firing -> gone`. Cancelling removes
//! the entry and then joins the task, so once `cancel` returns the expiry
//! action has either not run at all or has fully completed. The task only
//! acts if its entry is still the current one for the identity when the
//! delay elapses.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::token_prefix;

struct PendingTimer {
    id: u64,
    firing: bool,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-identity grace timers
pub struct GraceTimers {
    delay: Duration,
    pending: Arc<Mutex<HashMap<String, PendingTimer>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for GraceTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraceTimers")
            .field("delay", &self.delay)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl GraceTimers {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Configured grace delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `on_expire` to run after the grace delay unless cancelled.
    ///
    /// Any timer already pending for `identity` is cancelled (and joined)
    /// first.
    pub async fn start<F>(&self, identity: &str, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let replaced = {
            let mut pending = self.pending.lock();
            // The lock is held until the entry is inserted, so the task can
            // never observe the map without its own entry.
            let handle = tokio::spawn(run_timer(
                self.pending.clone(),
                identity.to_string(),
                id,
                self.delay,
                cancel_rx,
                on_expire,
            ));
            pending.insert(
                identity.to_string(),
                PendingTimer {
                    id,
                    firing: false,
                    cancel: cancel_tx,
                    handle,
                },
            )
        };

        if let Some(old) = replaced {
            debug!(identity = token_prefix(identity), "replacing grace timer");
            stop(old).await;
        }

        debug!(
            identity = token_prefix(identity),
            delay_ms = self.delay.as_millis() as u64,
            "grace period started"
        );
    }

    /// Cancel the pending timer for `identity`, waiting for an in-flight
    /// expiry to finish. Returns true if a timer was pending.
    pub async fn cancel(&self, identity: &str) -> bool {
        let entry = self.pending.lock().remove(identity);
        match entry {
            Some(timer) => {
                let was_firing = timer.firing;
                stop(timer).await;
                debug!(
                    identity = token_prefix(identity),
                    was_firing, "grace period cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// True if a timer is pending (or firing) for `identity`
    pub fn is_pending(&self, identity: &str) -> bool {
        self.pending.lock().contains_key(identity)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every pending timer without running its expiry action
    pub fn shutdown(&self) {
        let drained: Vec<PendingTimer> = self.pending.lock().drain().map(|(_, t)| t).collect();
        for timer in drained {
            timer.handle.abort();
        }
    }
}

async fn stop(timer: PendingTimer) {
    // Fails harmlessly once the task is past its sleep
    let _ = timer.cancel.send(());
    if let Err(e) = timer.handle.await {
        if !e.is_cancelled() {
            warn!("grace timer task failed: {}", e);
        }
    }
}

async fn run_timer<F>(
    pending: Arc<Mutex<HashMap<String, PendingTimer>>>,
    identity: String,
    id: u64,
    delay: Duration,
    cancel_rx: oneshot::Receiver<()>,
    on_expire: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel_rx => return,
    }

    let armed = {
        let mut pending = pending.lock();
        match pending.get_mut(&identity) {
            Some(timer) if timer.id == id => {
                timer.firing = true;
                true
            }
            _ => false,
        }
    };
    if !armed {
        return;
    }

    debug!(identity = token_prefix(&identity), "grace period expired");
    on_expire.await;

    let mut pending = pending.lock();
    if pending.get(&identity).is_some_and(|t| t.id == id) {
        pending.remove(&identity);
    }
}
