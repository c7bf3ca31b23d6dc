use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rdt_lab_abstract::{Channel, Endpoint, Segment, SessionConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::policy::{AckMode, Policy, Recovery};
use crate::timer::TimerService;
use crate::window::{SenderWindow, WindowStats};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Blocks accepted from the application.
    pub blocks: u64,
    /// Every data segment handed to the channel.
    pub transmissions: u64,
    pub acks: u64,
    pub nacks: u64,
    pub corrupt_replies: u64,
    pub window: WindowStats,
}

/// Sending endpoint: frames application blocks and runs them through the
/// window according to the session's [`Policy`].
pub struct RdtSender {
    policy: Policy,
    channel: Arc<dyn Channel>,
    window: SenderWindow,
    admission: tokio::sync::Mutex<()>,
    blocks: AtomicU64,
    unwindowed_sends: AtomicU64,
    acks: AtomicU64,
    nacks: AtomicU64,
    corrupt_replies: AtomicU64,
}

impl RdtSender {
    /// Sender for `config`, with timers on the current tokio runtime.
    pub fn new(config: &SessionConfig, channel: Arc<dyn Channel>) -> Result<Self> {
        let policy = Policy::for_session(config)?;
        Ok(Self::with_policy(policy, channel, TimerService::new()))
    }

    pub fn with_policy(policy: Policy, channel: Arc<dyn Channel>, timers: TimerService) -> Self {
        let window = SenderWindow::new(&policy, Arc::clone(&channel), timers);
        info!(
            "Sender ready: {} (window {}, block {}, timeout {:?})",
            policy.variant, policy.capacity, policy.block_size, policy.timeout
        );
        Self {
            policy,
            channel,
            window,
            admission: tokio::sync::Mutex::new(()),
            blocks: AtomicU64::new(0),
            unwindowed_sends: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            nacks: AtomicU64::new(0),
            corrupt_replies: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn window(&self) -> &SenderWindow {
        &self.window
    }

    /// Reliably send block `block` of the application stream.
    ///
    /// Suspends while the window is full. Stop-and-wait variants with error
    /// control return only once the block is acknowledged; windowed variants
    /// return as soon as the block is in flight.
    pub async fn send(&self, block: i32, payload: Vec<i32>) -> Result<()> {
        if payload.len() != self.policy.block_size {
            return Err(TransportError::BlockSize {
                expected: self.policy.block_size,
                actual: payload.len(),
            });
        }
        let seq = self.policy.seq_of(block)?;
        let segment = Segment::data(seq, payload, Endpoint::Receiver, self.policy.data_eflag);

        let _admission = self.admission.lock().await;
        self.blocks.fetch_add(1, Ordering::Relaxed);

        if self.policy.recovery == Recovery::None {
            debug!("Send block {} (seq {}) unguarded", block, seq);
            self.channel.send(segment);
            self.unwindowed_sends.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.window.wait_for_capacity().await?;
        self.window.admit(segment)?;

        if self.policy.await_ack {
            self.window.wait_until_acked(block).await?;
            debug!("Block {} acknowledged", block);
        }
        Ok(())
    }

    /// Handle an ACK or NACK coming back from the receiver.
    pub fn on_segment(&self, segment: Segment) {
        if self.policy.verify_checksum && !segment.is_intact() {
            self.corrupt_replies.fetch_add(1, Ordering::Relaxed);
            warn!("Receive corrupt ACK: {}", segment.ack_num());
            if self.policy.recovery == Recovery::OnNack {
                self.window.retransmit_outstanding();
            }
            return;
        }

        let ack = segment.ack_num();
        let block = self.policy.block_of(ack);
        match self.policy.ack_mode {
            AckMode::Cumulative => {
                if self.window.receive_cumulative_ack(block) > 0 {
                    self.acks.fetch_add(1, Ordering::Relaxed);
                }
            }
            AckMode::Positive | AckMode::PositiveNegative => {
                if self.window.contains(block) {
                    debug!("Receive ACK Number: {}", ack);
                    self.acks.fetch_add(1, Ordering::Relaxed);
                    self.window.receive_cumulative_ack(block);
                } else if self.policy.ack_mode == AckMode::PositiveNegative {
                    self.nacks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "NACK {} (block {}), outstanding {:?}",
                        ack,
                        block,
                        self.window.outstanding_blocks()
                    );
                    if self.policy.recovery == Recovery::OnNack {
                        self.window.retransmit_outstanding();
                    }
                } else {
                    debug!("Ignoring ACK {} for block {}", ack, block);
                }
            }
        }
    }

    /// Wait until every admitted block is acknowledged.
    pub async fn flush(&self) -> Result<()> {
        if self.policy.recovery == Recovery::None {
            return Ok(());
        }
        let _admission = self.admission.lock().await;
        self.window.wait_until_drained().await
    }

    /// Stop all retransmission timers. Pending and later sends fail with
    /// [`TransportError::Closed`].
    pub fn shutdown(&self) {
        self.window.shutdown();
    }

    pub fn stats(&self) -> SenderStats {
        let window = self.window.stats();
        SenderStats {
            blocks: self.blocks.load(Ordering::Relaxed),
            transmissions: window.transmissions + self.unwindowed_sends.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            nacks: self.nacks.load(Ordering::Relaxed),
            corrupt_replies: self.corrupt_replies.load(Ordering::Relaxed),
            window,
        }
    }
}
