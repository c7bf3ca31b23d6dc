//! Error type for the transport engine.
//!
//! Checksum mismatches, full windows, timer races and channel faults are
//! routine protocol events and never show up here; they are absorbed by
//! NACKs, backpressure and retransmission. What remains are caller mistakes
//! and the one fatal runtime condition, a failing delivery sink.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// `admit` was called while the window had no free slot. Callers are
    /// expected to wait for capacity first.
    #[error("sender window full ({capacity} segments outstanding)")]
    WindowFull { capacity: usize },

    /// The block is already in flight or lies below the window base.
    #[error("block {0} was already admitted")]
    DuplicateBlock(i32),

    #[error("payload has {actual} elements but the session block size is {expected}")]
    BlockSize { expected: usize, actual: usize },

    #[error("block index {0} does not fit the sequence number space")]
    SequenceOverflow(i32),

    #[error("invalid session configuration: {0}")]
    Config(String),

    /// Writing to the delivery sink failed; delivered data would be lost.
    #[error("delivery sink failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("transport session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
