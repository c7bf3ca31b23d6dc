//! Sender-side sliding window.
//!
//! [`SenderWindow`] holds up to `capacity` unacknowledged segments keyed by
//! block index, each guarded by a periodic retransmission timer (or one
//! window-wide timer, for Go-Back-N).
//!
//! ```text
//!        base                       base + capacity
//!         │                               │
//!  ───────┼───────────────────────────────┼──────▶ block index
//!  acked  │ <──── outstanding (≤ cap) ──▶ │ not yet admitted
//! ```
//!
//! # Concurrency
//!
//! `base`, `outstanding` and the window timer sit behind one mutex shared by
//! `admit`, ACK processing and timer-expiry retransmission. A timer firing
//! only resends a block it still finds under that lock, so a retired block is
//! never resent. Timers are cancelled after the lock is released: a firing
//! holds its timer slot while waiting for the window lock, and the ACK path
//! must not hold the window lock while waiting for that slot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rdt_lab_abstract::{Channel, Segment};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::policy::{Policy, Recovery, block_of};
use crate::timer::{TimerHandle, TimerService};

/// Counters kept by the window, reported at the end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub admitted: u64,
    /// Every segment put on the channel, first sends and retransmissions.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub slides: u64,
    pub retired: u64,
    pub stale_acks: u64,
    /// Congestion window in segments. Held at the window capacity.
    pub cwnd: usize,
}

#[derive(Debug)]
struct Outstanding {
    segment: Segment,
    timer: Option<TimerHandle>,
}

#[derive(Debug)]
struct WindowState {
    base: i32,
    /// One past the highest block ever admitted.
    next_block: i32,
    outstanding: BTreeMap<i32, Outstanding>,
    window_timer: Option<TimerHandle>,
    stats: WindowStats,
    closed: bool,
}

fn lock_state(state: &Mutex<WindowState>) -> MutexGuard<'_, WindowState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SenderWindow {
    state: Arc<Mutex<WindowState>>,
    capacity: usize,
    block_size: usize,
    interval: Duration,
    recovery: Recovery,
    channel: Arc<dyn Channel>,
    timers: TimerService,
    changed: Arc<Notify>,
}

impl SenderWindow {
    pub fn new(policy: &Policy, channel: Arc<dyn Channel>, timers: TimerService) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                base: 0,
                next_block: 0,
                outstanding: BTreeMap::new(),
                window_timer: None,
                stats: WindowStats {
                    cwnd: policy.capacity,
                    ..WindowStats::default()
                },
                closed: false,
            })),
            capacity: policy.capacity,
            block_size: policy.block_size,
            interval: policy.timeout,
            recovery: policy.recovery,
            channel,
            timers,
            changed: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        lock_state(&self.state)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.lock().outstanding.len() >= self.capacity
    }

    /// Lowest unacknowledged block index.
    pub fn base(&self) -> i32 {
        self.lock().base
    }

    pub fn in_flight(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().outstanding.is_empty()
    }

    pub fn contains(&self, block: i32) -> bool {
        self.lock().outstanding.contains_key(&block)
    }

    /// Outstanding block indices in ascending order.
    pub fn outstanding_blocks(&self) -> Vec<i32> {
        self.lock().outstanding.keys().copied().collect()
    }

    /// Congestion window, as reported in [`WindowStats::cwnd`].
    pub fn congestion_window(&self) -> usize {
        self.lock().stats.cwnd
    }

    pub fn stats(&self) -> WindowStats {
        self.lock().stats.clone()
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Put a framed segment in flight: record it, arm its timer and transmit.
    ///
    /// Fails with [`TransportError::WindowFull`] if no slot is free; callers
    /// wait on [`SenderWindow::wait_for_capacity`] first.
    pub fn admit(&self, segment: Segment) -> Result<i32> {
        let block = block_of(segment.seq_num(), self.block_size);
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.outstanding.len() >= self.capacity {
            return Err(TransportError::WindowFull {
                capacity: self.capacity,
            });
        }
        if block < state.base || state.outstanding.contains_key(&block) {
            return Err(TransportError::DuplicateBlock(block));
        }

        let timer = match self.recovery {
            Recovery::PerSegmentTimer => Some(self.arm_segment_timer(block)),
            Recovery::WindowTimer => {
                if state.window_timer.is_none() {
                    state.window_timer = Some(self.arm_window_timer());
                }
                None
            }
            _ => None,
        };

        debug!(
            "Admit block {} (seq {}), {} in flight, cwnd {}",
            block,
            segment.seq_num(),
            state.outstanding.len() + 1,
            state.stats.cwnd
        );
        self.channel.send(segment.clone());
        state.outstanding.insert(block, Outstanding { segment, timer });
        state.next_block = state.next_block.max(block.saturating_add(1));
        state.stats.admitted += 1;
        state.stats.transmissions += 1;
        Ok(block)
    }

    /// Apply a cumulative ACK: every block up to and including `acked_block`
    /// is retired and the base moves to `acked_block + 1`.
    ///
    /// ACKs that do not advance the window, and ACKs for blocks never
    /// admitted, are ignored. Returns the number of retired segments.
    pub fn receive_cumulative_ack(&self, acked_block: i32) -> usize {
        let mut cancelled = Vec::new();
        let retired = {
            let mut state = self.lock();
            if acked_block < state.base || acked_block >= state.next_block {
                state.stats.stale_acks += 1;
                debug!(
                    "Ignoring ACK for block {} (base {}, next {})",
                    acked_block, state.base, state.next_block
                );
                return 0;
            }

            let remaining = state.outstanding.split_off(&(acked_block + 1));
            let acked = std::mem::replace(&mut state.outstanding, remaining);
            let retired = acked.len();
            cancelled.extend(acked.into_values().filter_map(|entry| entry.timer));

            state.base = acked_block + 1;
            state.stats.slides += 1;
            state.stats.retired += retired as u64;

            if self.recovery == Recovery::WindowTimer {
                cancelled.extend(state.window_timer.take());
                if !state.outstanding.is_empty() {
                    state.window_timer = Some(self.arm_window_timer());
                }
            }

            info!("Window slides. Current base: {}", state.base);
            retired
        };

        for timer in &cancelled {
            timer.cancel();
        }
        self.changed.notify_waiters();
        retired
    }

    /// Resend every outstanding segment in ascending block order. Used for
    /// NACK-driven recovery.
    pub fn retransmit_outstanding(&self) -> usize {
        let mut state = self.lock();
        let count = resend_all(&mut state, self.channel.as_ref());
        if count > 0 {
            info!("Retransmitted {} outstanding segment(s) from base {}", count, state.base);
        }
        count
    }

    fn arm_segment_timer(&self, block: i32) -> TimerHandle {
        let state = Arc::downgrade(&self.state);
        let channel = Arc::clone(&self.channel);
        self.timers.arm(self.interval, move || {
            retransmit_block(&state, channel.as_ref(), block);
        })
    }

    fn arm_window_timer(&self) -> TimerHandle {
        let state = Arc::downgrade(&self.state);
        let channel = Arc::clone(&self.channel);
        self.timers.arm(self.interval, move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = lock_state(&state);
            let count = resend_all(&mut state, channel.as_ref());
            if count > 0 {
                state.stats.timeouts += 1;
                warn!("Timeout! Going back to block {} ({} segments)", state.base, count);
            }
        })
    }

    /// Suspend until a slot is free.
    pub async fn wait_for_capacity(&self) -> Result<()> {
        let capacity = self.capacity;
        self.wait_until(move |state| state.outstanding.len() < capacity)
            .await
    }

    /// Suspend until `block` has been acknowledged.
    pub async fn wait_until_acked(&self, block: i32) -> Result<()> {
        self.wait_until(move |state| !state.outstanding.contains_key(&block))
            .await
    }

    /// Suspend until nothing is outstanding.
    pub async fn wait_until_drained(&self) -> Result<()> {
        self.wait_until(|state| state.outstanding.is_empty()).await
    }

    async fn wait_until<F>(&self, done: F) -> Result<()>
    where
        F: Fn(&WindowState) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.lock();
                if done(&state) {
                    return Ok(());
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
            }
            notified.await;
        }
    }

    /// Cancel every timer and refuse further admissions. Waiters are woken
    /// and fail with [`TransportError::Closed`] unless already satisfied.
    pub fn shutdown(&self) {
        let timers: Vec<TimerHandle> = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut timers: Vec<TimerHandle> = state
                .outstanding
                .values_mut()
                .filter_map(|entry| entry.timer.take())
                .collect();
            timers.extend(state.window_timer.take());
            timers
        };
        for timer in &timers {
            timer.cancel();
        }
        self.changed.notify_waiters();
    }
}

impl Drop for SenderWindow {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn retransmit_block(state: &Weak<Mutex<WindowState>>, channel: &dyn Channel, block: i32) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock_state(&state);
    // Retired while this firing was pending: nothing to resend.
    let Some(segment) = state.outstanding.get(&block).map(|e| e.segment.clone()) else {
        return;
    };
    warn!(
        "Timeout! Retransmitting packet seq: {} (block {})",
        segment.seq_num(),
        block
    );
    channel.send(segment);
    state.stats.timeouts += 1;
    state.stats.retransmissions += 1;
    state.stats.transmissions += 1;
}

fn resend_all(state: &mut WindowState, channel: &dyn Channel) -> usize {
    let segments: Vec<Segment> = state
        .outstanding
        .values()
        .map(|entry| entry.segment.clone())
        .collect();
    for segment in &segments {
        channel.send(segment.clone());
    }
    let count = segments.len() as u64;
    state.stats.retransmissions += count;
    state.stats.transmissions += count;
    segments.len()
}
