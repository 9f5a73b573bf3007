// ── Idle timer ──
//
// Single-slot, re-armable delayed action. Arming replaces whatever was
// pending; the slot is checked under its lock before firing, so a
// `cancel` that wins the lock always prevents the fire.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

/// What happens when an idle window elapses.
pub trait IdleAction: Send + Sync {
    fn on_idle(&self, label: &'static str) -> BoxFuture<'_, Result<(), CoreError>>;
}

struct Armed {
    seq: u64,
    label: &'static str,
    token: CancellationToken,
}

/// Delayed [`IdleAction`] with at most one pending fire.
pub struct IdleTimer {
    delay: Duration,
    action: Arc<dyn IdleAction>,
    slot: Arc<Mutex<Option<Armed>>>,
    seq: AtomicU64,
}

impl IdleTimer {
    pub fn new(delay: Duration, action: Arc<dyn IdleAction>) -> Self {
        Self {
            delay,
            action,
            slot: Arc::new(Mutex::new(None)),
            seq: AtomicU64::new(0),
        }
    }

    /// Arm the timer, disarming any pending one first. Returns the new
    /// sequence id.
    pub async fn start(&self, label: &'static str) -> u64 {
        let mut slot = self.slot.lock().await;
        if let Some(prev) = slot.take() {
            prev.token.cancel();
            debug!(seq = prev.seq, label = prev.label, "idle timer superseded");
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        *slot = Some(Armed {
            seq,
            label,
            token: token.clone(),
        });
        drop(slot);

        debug!(seq, label, delay_ms = self.delay.as_millis(), "idle timer armed");
        tokio::spawn(fire_after(
            self.delay,
            seq,
            label,
            token,
            Arc::clone(&self.slot),
            Arc::clone(&self.action),
        ));
        seq
    }

    /// Disarm the pending timer. Returns `false` if nothing was pending.
    pub async fn cancel(&self, reason: &str) -> bool {
        let Some(armed) = self.slot.lock().await.take() else {
            return false;
        };
        armed.token.cancel();
        debug!(seq = armed.seq, label = armed.label, reason, "idle timer cancelled");
        true
    }

    /// Id of the most recent arm; 0 before the first.
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    pub async fn is_armed(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock() {
            if let Some(armed) = slot.take() {
                armed.token.cancel();
            }
        }
    }
}

impl std::fmt::Debug for IdleTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimer")
            .field("delay", &self.delay)
            .field("seq", &self.sequence())
            .finish_non_exhaustive()
    }
}

async fn fire_after(
    delay: Duration,
    seq: u64,
    label: &'static str,
    token: CancellationToken,
    slot: Arc<Mutex<Option<Armed>>>,
    action: Arc<dyn IdleAction>,
) {
    tokio::select! {
        () = token.cancelled() => return,
        () = tokio::time::sleep(delay) => {}
    }

    {
        let mut slot = slot.lock().await;
        match slot.as_ref() {
            Some(armed) if armed.seq == seq => *slot = None,
            _ => return,
        }
    }

    debug!(seq, label, "idle timer fired");
    if let Err(e) = action.on_idle(label).await {
        warn!(seq, label, error = %e, "idle action failed");
    }
}
