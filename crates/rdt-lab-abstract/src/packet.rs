use serde::{Deserialize, Serialize};

use crate::checksum;

/// Fault classes the channel should simulate for a segment.
///
/// The wire codes follow the lab's `eFlag` numbering: 0 is an error-free
/// channel, 7 enables errors, loss and delay together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFlag {
    #[default]
    None,
    Error,
    Loss,
    Delay,
    ErrorLoss,
    ErrorDelay,
    LossDelay,
    All,
}

impl ErrorFlag {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ErrorFlag::None,
            1 => ErrorFlag::Error,
            2 => ErrorFlag::Loss,
            3 => ErrorFlag::Delay,
            4 => ErrorFlag::ErrorLoss,
            5 => ErrorFlag::ErrorDelay,
            6 => ErrorFlag::LossDelay,
            7 => ErrorFlag::All,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            ErrorFlag::None => 0,
            ErrorFlag::Error => 1,
            ErrorFlag::Loss => 2,
            ErrorFlag::Delay => 3,
            ErrorFlag::ErrorLoss => 4,
            ErrorFlag::ErrorDelay => 5,
            ErrorFlag::LossDelay => 6,
            ErrorFlag::All => 7,
        }
    }

    pub fn corrupts(self) -> bool {
        matches!(
            self,
            ErrorFlag::Error | ErrorFlag::ErrorLoss | ErrorFlag::ErrorDelay | ErrorFlag::All
        )
    }

    pub fn drops(self) -> bool {
        matches!(
            self,
            ErrorFlag::Loss | ErrorFlag::ErrorLoss | ErrorFlag::LossDelay | ErrorFlag::All
        )
    }

    pub fn delays(self) -> bool {
        matches!(
            self,
            ErrorFlag::Delay | ErrorFlag::ErrorDelay | ErrorFlag::LossDelay | ErrorFlag::All
        )
    }
}

/// Routing target of a segment. There are exactly two endpoints per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Sender,
    Receiver,
}

impl Endpoint {
    pub fn peer(&self) -> Self {
        match self {
            Endpoint::Sender => Endpoint::Receiver,
            Endpoint::Receiver => Endpoint::Sender,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Byte-stream offset of the first payload element (1-based).
    pub seq_num: i32,
    /// Acknowledged sequence number. Replies use it; data segments carry 0.
    pub ack_num: i32,
    /// CRC-32 over seq, ack and payload. See [`crate::checksum`].
    pub checksum: u32,
    pub eflag: ErrorFlag,
}

/// One framed transport segment.
///
/// Segments are only built through [`Segment::data`] and [`Segment::reply`],
/// which stamp the checksum, so a freshly built segment is always intact.
/// Fields are read through accessors; the one mutation that leaves the
/// checksum stale is [`Segment::flip_bit`], the fault-injection primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    header: SegmentHeader,
    payload: Vec<i32>,
    destination: Endpoint,
}

impl Segment {
    /// Frame a data block addressed to `destination`.
    pub fn data(seq_num: i32, payload: Vec<i32>, destination: Endpoint, eflag: ErrorFlag) -> Self {
        Self::framed(seq_num, 0, payload, destination, eflag)
    }

    /// Frame an ACK/NACK with an empty payload.
    pub fn reply(ack_num: i32, destination: Endpoint, eflag: ErrorFlag) -> Self {
        Self::framed(0, ack_num, Vec::new(), destination, eflag)
    }

    fn framed(
        seq_num: i32,
        ack_num: i32,
        payload: Vec<i32>,
        destination: Endpoint,
        eflag: ErrorFlag,
    ) -> Self {
        let checksum = checksum::compute(seq_num, ack_num, &payload);
        Self {
            header: SegmentHeader {
                seq_num,
                ack_num,
                checksum,
                eflag,
            },
            payload,
            destination,
        }
    }

    /// Re-tag the error-control flag. The flag is not covered by the checksum.
    pub fn with_eflag(mut self, eflag: ErrorFlag) -> Self {
        self.header.eflag = eflag;
        self
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn seq_num(&self) -> i32 {
        self.header.seq_num
    }

    pub fn ack_num(&self) -> i32 {
        self.header.ack_num
    }

    pub fn checksum(&self) -> u32 {
        self.header.checksum
    }

    pub fn eflag(&self) -> ErrorFlag {
        self.header.eflag
    }

    pub fn payload(&self) -> &[i32] {
        &self.payload
    }

    pub fn destination(&self) -> Endpoint {
        self.destination
    }

    pub fn into_payload(self) -> Vec<i32> {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Checksum recomputed from the current header and payload.
    pub fn compute_checksum(&self) -> u32 {
        checksum::compute(self.header.seq_num, self.header.ack_num, &self.payload)
    }

    /// True when the stored checksum matches the segment contents.
    pub fn is_intact(&self) -> bool {
        self.compute_checksum() == self.header.checksum
    }

    /// Number of checksummed 32-bit words: seq, ack, then each payload element.
    pub fn word_count(&self) -> usize {
        2 + self.payload.len()
    }

    /// Flip bit `bit` (0..32) of checksummed word `word` without restamping
    /// the checksum. Word 0 is the sequence number, word 1 the ack number,
    /// word `2 + i` payload element `i`. Out-of-range words are ignored.
    pub fn flip_bit(&mut self, word: usize, bit: u32) {
        let mask = 1i32.rotate_left(bit % 32);
        match word {
            0 => self.header.seq_num ^= mask,
            1 => self.header.ack_num ^= mask,
            n => {
                if let Some(value) = self.payload.get_mut(n - 2) {
                    *value ^= mask;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_flag_codes_roundtrip() {
        for code in 0..=7u8 {
            let flag = ErrorFlag::from_code(code).unwrap();
            assert_eq!(flag.code(), code);
        }
        assert_eq!(ErrorFlag::from_code(8), None);
    }

    #[test]
    fn error_flag_fault_classes() {
        assert!(!ErrorFlag::None.corrupts() && !ErrorFlag::None.drops() && !ErrorFlag::None.delays());
        assert!(ErrorFlag::ErrorLoss.corrupts() && ErrorFlag::ErrorLoss.drops());
        assert!(!ErrorFlag::ErrorLoss.delays());
        assert!(ErrorFlag::All.corrupts() && ErrorFlag::All.drops() && ErrorFlag::All.delays());
        assert!(ErrorFlag::LossDelay.delays() && !ErrorFlag::LossDelay.corrupts());
    }

    #[test]
    fn built_segments_are_intact() {
        let data = Segment::data(101, vec![1, 2, 3], Endpoint::Receiver, ErrorFlag::All);
        assert!(data.is_intact());
        assert_eq!(data.ack_num(), 0);

        let ack = Segment::reply(101, Endpoint::Sender, ErrorFlag::Error);
        assert!(ack.is_intact());
        assert!(ack.is_empty());
        assert_eq!(ack.destination(), Endpoint::Sender);
    }

    #[test]
    fn eflag_is_outside_checksum() {
        let seg = Segment::data(1, vec![5, 6], Endpoint::Receiver, ErrorFlag::None);
        let tagged = seg.clone().with_eflag(ErrorFlag::All);
        assert_eq!(tagged.checksum(), seg.checksum());
        assert!(tagged.is_intact());
    }

    #[test]
    fn flipped_bit_breaks_integrity() {
        let mut seg = Segment::data(1, vec![10, 20, 30], Endpoint::Receiver, ErrorFlag::Error);
        seg.flip_bit(3, 0);
        assert_eq!(seg.payload(), &[10, 21, 30]);
        assert!(!seg.is_intact());
    }

    #[test]
    fn flip_bit_out_of_range_is_ignored() {
        let mut seg = Segment::reply(1, Endpoint::Sender, ErrorFlag::None);
        seg.flip_bit(9, 3);
        assert!(seg.is_intact());
    }
}
