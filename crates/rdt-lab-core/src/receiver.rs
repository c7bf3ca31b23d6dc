//! Receiving endpoint.
//!
//! [`ReceiverAssembler`] validates inbound data segments, answers each one
//! with an ACK or NACK, buffers accepted payloads and hands them to the
//! delivery sink in batches of `delivery_batch`.
//!
//! Corrupted segments never reach the buffer and never change receiver
//! state; they are answered with a NACK naming the last good block, which
//! the sender reads as "resend what follows".

use std::sync::Arc;

use rdt_lab_abstract::{Channel, DeliverySink, Endpoint, Segment};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::policy::{Policy, ReceiverMode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub received: u64,
    pub corrupt: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub accepted: u64,
    pub delivered: u64,
    pub flushes: u64,
}

pub struct ReceiverAssembler {
    policy: Policy,
    channel: Arc<dyn Channel>,
    sink: Box<dyn DeliverySink>,
    expected_block: i32,
    last_block: i32,
    buffer: Vec<Vec<i32>>,
    stats: ReceiverStats,
}

impl ReceiverAssembler {
    pub fn new(policy: Policy, channel: Arc<dyn Channel>, sink: Box<dyn DeliverySink>) -> Self {
        let buffer = Vec::with_capacity(policy.delivery_batch);
        Self {
            policy,
            channel,
            sink,
            expected_block: 0,
            last_block: -1,
            buffer,
            stats: ReceiverStats::default(),
        }
    }

    /// Next in-order block the receiver is waiting for.
    pub fn expected_block(&self) -> i32 {
        self.expected_block
    }

    /// Last block accepted, or -1 before the first.
    pub fn last_block(&self) -> i32 {
        self.last_block
    }

    /// Payloads accepted but not yet delivered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.clone()
    }

    /// Process one inbound data segment.
    ///
    /// The only error is a failing sink, which ends the session.
    pub fn on_segment(&mut self, segment: Segment) -> Result<()> {
        self.stats.received += 1;

        if self.policy.receiver_mode != ReceiverMode::Plain && !segment.is_intact() {
            self.stats.corrupt += 1;
            let nack = self.policy.seq_of(self.last_block)?;
            warn!(
                "Corrupt segment seq {}, NACK last block {}",
                segment.seq_num(),
                self.last_block
            );
            self.reply(nack);
            return Ok(());
        }

        let seq = segment.seq_num();
        let block = self.policy.block_of(seq);

        match self.policy.receiver_mode {
            ReceiverMode::Plain => {
                self.reply(seq);
                self.accept(block, segment)?;
            }
            ReceiverMode::StopAndWait => {
                self.reply(seq);
                if block == self.last_block {
                    self.stats.duplicates += 1;
                    debug!("Duplicate block {} re-acknowledged", block);
                } else {
                    self.accept(block, segment)?;
                }
            }
            ReceiverMode::Cumulative => {
                if block == self.expected_block {
                    self.accept(block, segment)?;
                } else if block < self.expected_block {
                    self.stats.duplicates += 1;
                    debug!("Duplicate block {} (expecting {})", block, self.expected_block);
                } else {
                    self.stats.out_of_order += 1;
                    debug!("Out-of-order block {} (expecting {})", block, self.expected_block);
                }
                let ack = self.policy.seq_of(self.expected_block - 1)?;
                self.reply(ack);
            }
        }
        Ok(())
    }

    /// Deliver whatever is still buffered. Called once at session end.
    pub fn finish(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        info!(
            "Receiver finished: {} block(s) delivered in {} flush(es)",
            self.stats.delivered, self.stats.flushes
        );
        Ok(())
    }

    fn accept(&mut self, block: i32, segment: Segment) -> Result<()> {
        self.last_block = block;
        self.expected_block = block + 1;
        self.buffer.push(segment.into_payload());
        self.stats.accepted += 1;
        if self.buffer.len() >= self.policy.delivery_batch {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.deliver(&self.buffer)?;
        self.stats.delivered += self.buffer.len() as u64;
        self.stats.flushes += 1;
        debug!("Flushed {} block(s) to sink", self.buffer.len());
        self.buffer.clear();
        Ok(())
    }

    fn reply(&self, ack_num: i32) {
        debug!("ACK: {}", ack_num);
        self.channel
            .send(Segment::reply(ack_num, Endpoint::Sender, self.policy.ack_eflag));
    }
}
