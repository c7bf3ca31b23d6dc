//! Maps a [`Variant`] onto the parameters of the single transport engine.
//!
//! | variant        | capacity | ACK mode          | recovery            | send returns    |
//! |----------------|----------|-------------------|---------------------|-----------------|
//! | stop-and-wait  | 1        | positive          | none                | after transmit  |
//! | checksum       | 1        | positive          | block until match   | after ACK       |
//! | nack           | 1        | positive/negative | resend on NACK      | after ACK       |
//! | timer          | 1        | positive/negative | per-segment timer   | after ACK       |
//! | go-back-n      | N        | cumulative        | window-wide timer   | after admission |
//! | windowed       | N        | cumulative        | per-segment timer   | after admission |

use rdt_lab_abstract::{ErrorFlag, SessionConfig, Variant};
use std::time::Duration;

use crate::error::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Only an ACK naming the outstanding block counts; anything else is ignored.
    Positive,
    /// An ACK naming any other block is a NACK for the outstanding one.
    PositiveNegative,
    /// An ACK for block N retires every block up to and including N.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fire and forget; the channel is assumed perfect.
    None,
    /// Wait for a matching ACK with no timer.
    BlockAndWait,
    /// Resend outstanding segments when a NACK or a corrupted reply arrives.
    OnNack,
    /// One periodic timer per outstanding segment; expiry resends that segment.
    PerSegmentTimer,
    /// One periodic timer for the whole window; expiry resends every
    /// outstanding segment in ascending order.
    WindowTimer,
}

/// How the receiver treats inbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverMode {
    /// No checksum, ACK and deliver everything.
    Plain,
    /// Checksum, echo ACK of the received seq, suppress repeats of the last block.
    StopAndWait,
    /// Checksum, cumulative ACK of the last in-order block, in-order delivery only.
    Cumulative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub variant: Variant,
    pub capacity: usize,
    pub block_size: usize,
    pub timeout: Duration,
    pub delivery_batch: usize,
    pub ack_mode: AckMode,
    pub recovery: Recovery,
    pub receiver_mode: ReceiverMode,
    /// Sender checks reply checksums.
    pub verify_checksum: bool,
    /// `send` returns only after the block is acknowledged.
    pub await_ack: bool,
    pub data_eflag: ErrorFlag,
    pub ack_eflag: ErrorFlag,
}

impl Policy {
    pub fn for_session(config: &SessionConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(TransportError::Config("block_size must be at least 1".into()));
        }
        if config.delivery_batch == 0 {
            return Err(TransportError::Config(
                "delivery_batch must be at least 1".into(),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(TransportError::Config("timeout_ms must be positive".into()));
        }
        if i32::try_from(config.block_size).is_err() {
            return Err(TransportError::Config(format!(
                "block_size {} exceeds the sequence number space",
                config.block_size
            )));
        }

        let (capacity, ack_mode, recovery, receiver_mode) = match config.variant {
            Variant::StopAndWait => (1, AckMode::Positive, Recovery::None, ReceiverMode::Plain),
            Variant::Checksum => (
                1,
                AckMode::Positive,
                Recovery::BlockAndWait,
                ReceiverMode::StopAndWait,
            ),
            Variant::Nack => (
                1,
                AckMode::PositiveNegative,
                Recovery::OnNack,
                ReceiverMode::StopAndWait,
            ),
            Variant::Timer => (
                1,
                AckMode::PositiveNegative,
                Recovery::PerSegmentTimer,
                ReceiverMode::StopAndWait,
            ),
            Variant::GoBackN => (
                config.window_size,
                AckMode::Cumulative,
                Recovery::WindowTimer,
                ReceiverMode::Cumulative,
            ),
            Variant::Windowed => (
                config.window_size,
                AckMode::Cumulative,
                Recovery::PerSegmentTimer,
                ReceiverMode::Cumulative,
            ),
        };

        if capacity == 0 {
            return Err(TransportError::Config("window_size must be at least 1".into()));
        }

        Ok(Self {
            variant: config.variant,
            capacity,
            block_size: config.block_size,
            timeout: Duration::from_millis(config.timeout_ms),
            delivery_batch: config.delivery_batch,
            ack_mode,
            recovery,
            receiver_mode,
            verify_checksum: receiver_mode != ReceiverMode::Plain,
            await_ack: matches!(
                config.variant,
                Variant::Checksum | Variant::Nack | Variant::Timer
            ),
            data_eflag: config.data_eflag(),
            ack_eflag: config.ack_eflag(),
        })
    }

    /// Sequence number of the first element of `block`: `block × block_size + 1`.
    pub fn seq_of(&self, block: i32) -> Result<i32> {
        seq_of(block, self.block_size)
    }

    /// Block index named by a sequence or acknowledgement number.
    pub fn block_of(&self, seq: i32) -> i32 {
        block_of(seq, self.block_size)
    }
}

pub(crate) fn seq_of(block: i32, block_size: usize) -> Result<i32> {
    // block_size was checked against i32 in Policy::for_session
    let size = block_size as i32;
    block
        .checked_mul(size)
        .and_then(|s| s.checked_add(1))
        .ok_or(TransportError::SequenceOverflow(block))
}

pub(crate) fn block_of(seq: i32, block_size: usize) -> i32 {
    (seq as i64 - 1).div_euclid(block_size as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_and_wait_variants_use_a_single_slot() {
        for variant in [Variant::Checksum, Variant::Nack, Variant::Timer] {
            let policy = Policy::for_session(&SessionConfig::for_variant(variant)).unwrap();
            assert_eq!(policy.capacity, 1, "{variant}");
            assert!(policy.await_ack, "{variant}");
            assert_eq!(policy.receiver_mode, ReceiverMode::StopAndWait);
        }

        let rdt1 = Policy::for_session(&SessionConfig::for_variant(Variant::StopAndWait)).unwrap();
        assert_eq!(rdt1.recovery, Recovery::None);
        assert!(!rdt1.await_ack);
        assert!(!rdt1.verify_checksum);
    }

    #[test]
    fn windowed_variants_take_configured_capacity() {
        let cfg = SessionConfig {
            window_size: 8,
            ..SessionConfig::for_variant(Variant::GoBackN)
        };
        let gbn = Policy::for_session(&cfg).unwrap();
        assert_eq!(gbn.capacity, 8);
        assert_eq!(gbn.recovery, Recovery::WindowTimer);
        assert_eq!(gbn.ack_mode, AckMode::Cumulative);
        assert!(!gbn.await_ack);

        let tcp = Policy::for_session(&SessionConfig::default()).unwrap();
        assert_eq!(tcp.capacity, 16);
        assert_eq!(tcp.recovery, Recovery::PerSegmentTimer);
    }

    #[test]
    fn rejects_degenerate_configs() {
        let zero_window = SessionConfig {
            window_size: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            Policy::for_session(&zero_window),
            Err(TransportError::Config(_))
        ));

        let zero_block = SessionConfig {
            block_size: 0,
            ..SessionConfig::default()
        };
        assert!(Policy::for_session(&zero_block).is_err());
    }

    #[test]
    fn seq_and_block_addressing() {
        assert_eq!(seq_of(0, 100).unwrap(), 1);
        assert_eq!(seq_of(7, 100).unwrap(), 701);
        assert_eq!(block_of(701, 100), 7);
        assert_eq!(block_of(1, 100), 0);
        // NACK naming "no block yet": -1 × 100 + 1
        assert_eq!(block_of(-99, 100), -1);
        assert_eq!(block_of(-1, 100), -1);
        assert!(matches!(
            seq_of(i32::MAX, 100),
            Err(TransportError::SequenceOverflow(_))
        ));
    }
}
