use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct LeaseState {
    deadline: Instant,
    fired: bool,
}

/// One-shot, resettable expiry alarm backing a node's lease.
///
/// The deadline and the fired flag live under one lock, so a reset and the
/// expiry decision are totally ordered: either the reset moves the deadline
/// before the timer commits to firing (and the timer keeps waiting), or the
/// timer has already committed and the reset reports failure.
///
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct LeaseTimer {
    state: Arc<Mutex<LeaseState>>,
    rearm: Arc<Notify>,
    cancel: CancellationToken,
}

impl LeaseTimer {
    /// Arm a timer that runs `on_expire` once if not reset within `ttl`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(ttl: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(LeaseState {
            deadline: Instant::now() + ttl,
            fired: false,
        }));
        let rearm = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task_state = state.clone();
        let task_rearm = rearm.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let expired = loop {
                let deadline = task_state.lock().deadline;
                tokio::select! {
                    _ = task_cancel.cancelled() => break false,
                    _ = task_rearm.notified() => continue,
                    _ = sleep_until(deadline) => {}
                }

                let mut state = task_state.lock();
                if task_cancel.is_cancelled() {
                    break false;
                }
                if Instant::now() < state.deadline {
                    // Reset while we slept
                    continue;
                }
                state.fired = true;
                break true;
            };

            if expired {
                on_expire().await;
            }
        });

        Self {
            state,
            rearm,
            cancel,
        }
    }

    /// Push the deadline to `now + ttl`.
    ///
    /// Returns false if the timer already fired or was cancelled; the reset
    /// has no effect in that case.
    pub fn reset(&self, ttl: Duration) -> bool {
        let mut state = self.state.lock();
        if state.fired || self.cancel.is_cancelled() {
            return false;
        }
        state.deadline = Instant::now() + ttl;
        self.rearm.notify_one();
        true
    }

    /// Stop the timer. `on_expire` will not run afterwards unless it had
    /// already started.
    pub fn cancel(&self) {
        let _guard = self.state.lock();
        self.cancel.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Time left before the timer fires, or `None` once it has fired or
    /// been cancelled.
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        if state.fired || self.cancel.is_cancelled() {
            return None;
        }
        Some(state.deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for LeaseTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
