//! Periodic retransmission timers.
//!
//! Each armed timer is a tokio task that fires its callback every
//! `interval` (first firing one interval after arming) until cancelled.
//! A firing runs under the timer's slot lock and re-checks the cancelled
//! flag, and [`TimerHandle::cancel`] takes the same lock, so once `cancel`
//! returns the callback never runs again. A firing already running when
//! `cancel` is called finishes first.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TimerService {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl TimerService {
    /// Timer service on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Arm a periodic timer. `callback` fires every `interval` until the
    /// returned handle is cancelled.
    pub fn arm<F>(&self, interval: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Mutex::new(false));
        self.active.fetch_add(1, Ordering::SeqCst);

        let task_slot = Arc::clone(&slot);
        let task = self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cancelled = task_slot.lock().unwrap_or_else(PoisonError::into_inner);
                if *cancelled {
                    break;
                }
                callback();
            }
        });

        debug!("Armed timer {} ({:?} period)", id, interval);
        TimerHandle {
            id,
            slot,
            task: task.abort_handle(),
            active: Arc::clone(&self.active),
        }
    }

    /// Same as [`TimerHandle::cancel`].
    pub fn cancel(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Timers armed through this service and not yet cancelled.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Handle to one armed timer. Dropping the handle does not cancel the timer;
/// owners cancel explicitly when the guarded segment leaves the window.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    slot: Arc<Mutex<bool>>,
    task: AbortHandle,
    active: Arc<AtomicUsize>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the timer. Safe to call any number of times.
    pub fn cancel(&self) {
        let was_cancelled = {
            let mut cancelled = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *cancelled, true)
        };
        if !was_cancelled {
            self.active.fetch_sub(1, Ordering::SeqCst);
            debug!("Cancelled timer {}", self.id);
        }
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_timer(service: &TimerService, period_ms: u64) -> (TimerHandle, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let handle = service.arm(Duration::from_millis(period_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handle, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let service = TimerService::new();
        let (_handle, fired) = counting_timer(&service, 100);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(service.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_firing_after_cancel() {
        let service = TimerService::new();
        let (handle, fired) = counting_timer(&service, 100);

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        service.cancel(&handle);
        assert!(handle.is_cancelled());
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(service.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let service = TimerService::new();
        let (a, _) = counting_timer(&service, 100);
        let (b, _) = counting_timer(&service, 100);
        assert_eq!(service.active(), 2);

        a.cancel();
        a.cancel();
        a.cancel();
        assert_eq!(service.active(), 1);
        assert_ne!(a.id(), b.id());
    }
}
