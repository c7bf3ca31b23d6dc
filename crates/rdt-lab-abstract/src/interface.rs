use std::io;
use std::sync::Mutex;

use crate::packet::Segment;

/// The unreliable send primitive each endpoint transmits through.
///
/// Implementations may corrupt, drop or delay the segment according to its
/// error flag. Callers never learn the outcome directly; they only observe a
/// later ACK, NACK or timeout.
pub trait Channel: Send + Sync {
    fn send(&self, segment: Segment);
}

/// Where the receiver hands validated, in-order payloads.
pub trait DeliverySink: Send {
    /// Called with a full batch in receipt order. An error here is fatal to
    /// the session.
    fn deliver(&mut self, batch: &[Vec<i32>]) -> io::Result<()>;
}

/// Channel that only records what was sent. Useful for driving one endpoint
/// by hand.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Segment>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every segment sent so far.
    pub fn sent(&self) -> Vec<Segment> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Drain the recorded segments.
    pub fn take(&self) -> Vec<Segment> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Channel for RecordingChannel {
    fn send(&self, segment: Segment) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(segment);
        }
    }
}
