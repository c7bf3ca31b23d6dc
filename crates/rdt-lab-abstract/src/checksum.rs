/// CRC-32 integrity code over a segment's sequence number, acknowledgement
/// number and payload, fed in that order as big-endian words.
///
/// The error-control flag and destination are not covered, so re-tagging a
/// segment for fault injection never invalidates it. The same routine checks
/// data segments and ACK/NACK replies.
pub fn compute(seq_num: i32, ack_num: i32, payload: &[i32]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq_num.to_be_bytes());
    hasher.update(&ack_num.to_be_bytes());
    for value in payload {
        hasher.update(&value.to_be_bytes());
    }
    hasher.finalize()
}
