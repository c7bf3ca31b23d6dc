use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdt_lab_abstract::{Channel, ChannelConfig, Endpoint, Segment};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// A compact textual summary of one link-layer event.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEvent {
    pub time_ms: u64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub deterministic_drops: u64,
    pub corrupted: u64,
    pub delayed: u64,
}

struct LinkState {
    rng: StdRng,
    // Drop the first segment from the Sender carrying this seq number
    drop_seq_once: Vec<i32>,
    // Drop the first reply from the Receiver carrying this ack number
    drop_ack_once: Vec<i32>,
    stats: LinkStats,
    events: Vec<LinkEvent>,
    outbound: Option<mpsc::UnboundedSender<Segment>>,
}

/// One direction of the simulated network.
///
/// Applies the fault classes a segment's error flag enables (loss,
/// corruption, delay) and forwards survivors to the peer's inbound queue.
pub struct UnreliableChannel {
    source: Endpoint,
    config: ChannelConfig,
    epoch: Instant,
    runtime: Handle,
    state: Mutex<LinkState>,
}

impl UnreliableChannel {
    /// Link from `source` to its peer. Returns the channel and the peer's
    /// inbound queue; the queue ends once [`UnreliableChannel::close`] is
    /// called.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        source: Endpoint,
        config: &ChannelConfig,
        epoch: Instant,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Segment>)> {
        ensure!(
            (0.0..=1.0).contains(&config.loss_rate),
            "loss_rate must be within [0, 1], got {}",
            config.loss_rate
        );
        ensure!(
            (0.0..=1.0).contains(&config.corrupt_rate),
            "corrupt_rate must be within [0, 1], got {}",
            config.corrupt_rate
        );
        ensure!(
            config.min_latency <= config.max_latency,
            "min_latency ({}) exceeds max_latency ({})",
            config.min_latency,
            config.max_latency
        );

        // The two directions draw from distinct streams of the same seed.
        let seed = match source {
            Endpoint::Sender => config.seed,
            Endpoint::Receiver => config.seed.wrapping_add(1),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            source,
            config: config.clone(),
            epoch,
            runtime: Handle::current(),
            state: Mutex::new(LinkState {
                rng: StdRng::seed_from_u64(seed),
                drop_seq_once: Vec::new(),
                drop_ack_once: Vec::new(),
                stats: LinkStats::default(),
                events: Vec::new(),
                outbound: Some(tx),
            }),
        });
        Ok((channel, rx))
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a deterministic fault: drop the first data segment whose seq equals `seq`.
    pub fn add_drop_seq_once(&self, seq: i32) {
        self.lock().drop_seq_once.push(seq);
    }

    /// Register a deterministic fault: drop the first reply whose ack equals `ack`.
    pub fn add_drop_ack_once(&self, ack: i32) {
        self.lock().drop_ack_once.push(ack);
    }

    pub fn stats(&self) -> LinkStats {
        self.lock().stats.clone()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.lock().events.clone()
    }

    /// Stop forwarding. Segments still waiting out their latency are dropped
    /// and the inbound queue ends after what was already forwarded.
    pub fn close(&self) {
        if self.lock().outbound.take().is_some() {
            debug!("[{:?}->{:?}] link closed", self.source, self.source.peer());
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn deterministic_drop(&self, state: &mut LinkState, segment: &Segment) -> Option<String> {
        match self.source {
            Endpoint::Sender => {
                let pos = state
                    .drop_seq_once
                    .iter()
                    .position(|s| *s == segment.seq_num())?;
                state.drop_seq_once.remove(pos);
                Some(format!("DROP (deterministic seq) seq={}", segment.seq_num()))
            }
            Endpoint::Receiver => {
                let pos = state
                    .drop_ack_once
                    .iter()
                    .position(|a| *a == segment.ack_num())?;
                state.drop_ack_once.remove(pos);
                Some(format!("DROP (deterministic ack) ack={}", segment.ack_num()))
            }
        }
    }
}

impl Channel for UnreliableChannel {
    fn send(&self, mut segment: Segment) {
        let now = self.now_ms();
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(outbound) = state.outbound.clone() else {
            return;
        };
        state.stats.sent += 1;

        let route = format!("[{:?}->{:?}]", self.source, self.source.peer());
        let flag = segment.eflag();

        if let Some(description) = self.deterministic_drop(state, &segment) {
            debug!("{} {}", route, description);
            state.stats.deterministic_drops += 1;
            state.stats.dropped += 1;
            state.events.push(LinkEvent {
                time_ms: now,
                description: format!("{route} {description}"),
            });
            return;
        }

        // 1. Loss
        if flag.drops() && state.rng.random::<f64>() < self.config.loss_rate {
            debug!("{} segment lost seq={} ack={}", route, segment.seq_num(), segment.ack_num());
            state.stats.dropped += 1;
            state.events.push(LinkEvent {
                time_ms: now,
                description: format!(
                    "{route} DROP (random loss) seq={} ack={}",
                    segment.seq_num(),
                    segment.ack_num()
                ),
            });
            return;
        }

        // 2. Corruption: one flipped bit, checksum left stale
        if flag.corrupts() && state.rng.random::<f64>() < self.config.corrupt_rate {
            let word = state.rng.random_range(0..segment.word_count());
            let bit = state.rng.random_range(0..32u32);
            state.events.push(LinkEvent {
                time_ms: now,
                description: format!(
                    "{route} CORRUPT seq={} ack={} word={} bit={}",
                    segment.seq_num(),
                    segment.ack_num(),
                    word,
                    bit
                ),
            });
            segment.flip_bit(word, bit);
            state.stats.corrupted += 1;
        }

        // 3. Latency
        let latency = if flag.delays() {
            state
                .rng
                .random_range(self.config.min_latency..=self.config.max_latency)
        } else {
            0
        };

        state.events.push(LinkEvent {
            time_ms: now,
            description: format!(
                "{route} SEND seq={} ack={} (latency={}ms)",
                segment.seq_num(),
                segment.ack_num(),
                latency
            ),
        });
        state.stats.forwarded += 1;

        if latency == 0 {
            let _ = outbound.send(segment);
            return;
        }

        state.stats.delayed += 1;
        let outbound = outbound.downgrade();
        self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(latency)).await;
            if let Some(outbound) = outbound.upgrade() {
                let _ = outbound.send(segment);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_lab_abstract::ErrorFlag;

    fn data(seq: i32, eflag: ErrorFlag) -> Segment {
        Segment::data(seq, vec![1, 2, 3, 4], Endpoint::Receiver, eflag)
    }

    fn link(config: ChannelConfig) -> (Arc<UnreliableChannel>, mpsc::UnboundedReceiver<Segment>) {
        UnreliableChannel::new(Endpoint::Sender, &config, Instant::now()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn error_free_flag_bypasses_every_fault() {
        let (channel, mut rx) = link(ChannelConfig {
            loss_rate: 1.0,
            corrupt_rate: 1.0,
            ..Default::default()
        });
        channel.send(data(1, ErrorFlag::None));

        let seg = rx.try_recv().unwrap();
        assert!(seg.is_intact());
        assert_eq!(channel.stats().dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_only_applies_when_flag_allows() {
        let (channel, mut rx) = link(ChannelConfig {
            loss_rate: 1.0,
            ..Default::default()
        });
        channel.send(data(1, ErrorFlag::Loss));
        channel.send(data(101, ErrorFlag::Error));

        assert_eq!(rx.try_recv().unwrap().seq_num(), 101);
        assert!(rx.try_recv().is_err());
        let stats = channel.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn corruption_breaks_the_checksum() {
        let (channel, mut rx) = link(ChannelConfig {
            corrupt_rate: 1.0,
            ..Default::default()
        });
        for seq in [1, 101, 201, 301] {
            channel.send(data(seq, ErrorFlag::Error));
        }
        for _ in 0..4 {
            assert!(!rx.try_recv().unwrap().is_intact());
        }
        assert_eq!(channel.stats().corrupted, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_holds_segment_for_latency() {
        let (channel, mut rx) = link(ChannelConfig {
            min_latency: 50,
            max_latency: 50,
            ..Default::default()
        });
        channel.send(data(1, ErrorFlag::Delay));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rx.try_recv().unwrap().seq_num(), 1);
        assert_eq!(channel.stats().delayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_drop_fires_once() {
        let (channel, mut rx) = link(ChannelConfig::default());
        channel.add_drop_seq_once(101);
        channel.send(data(101, ErrorFlag::None));
        channel.send(data(101, ErrorFlag::None));

        assert_eq!(rx.try_recv().unwrap().seq_num(), 101);
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.stats().deterministic_drops, 1);
        assert!(channel.events()[0].description.contains("deterministic seq"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_faults() {
        let config = ChannelConfig {
            loss_rate: 0.3,
            corrupt_rate: 0.3,
            seed: 42,
            ..Default::default()
        };
        let outcome = |(channel, mut rx): (Arc<UnreliableChannel>, mpsc::UnboundedReceiver<Segment>)| {
            for i in 0..50 {
                channel.send(data(i * 100 + 1, ErrorFlag::ErrorLoss));
            }
            let mut seen = Vec::new();
            while let Ok(seg) = rx.try_recv() {
                seen.push((seg.seq_num(), seg.is_intact()));
            }
            seen
        };
        assert_eq!(outcome(link(config.clone())), outcome(link(config)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_link_discards() {
        let (channel, mut rx) = link(ChannelConfig::default());
        channel.close();
        channel.send(data(1, ErrorFlag::None));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn rejects_inverted_latency_range() {
        let config = ChannelConfig {
            min_latency: 200,
            max_latency: 100,
            ..Default::default()
        };
        assert!(UnreliableChannel::new(Endpoint::Sender, &config, Instant::now()).is_err());
    }
}
