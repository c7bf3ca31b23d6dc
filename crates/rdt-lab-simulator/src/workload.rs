//! Deterministic application data.

/// `count` blocks starting at block `start`. Block `i` holds the values
/// `i × block_size .. (i + 1) × block_size`, so delivered output can be
/// checked against the block indices alone.
pub fn generate_from(start: usize, count: usize, block_size: usize) -> Vec<Vec<i32>> {
    (start..start + count)
        .map(|block| {
            let first = block * block_size;
            (first..first + block_size).map(|v| v as i32).collect()
        })
        .collect()
}

/// The first `blocks` blocks of the stream.
pub fn generate(blocks: usize, block_size: usize) -> Vec<Vec<i32>> {
    generate_from(0, blocks, block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_consecutive_ranges() {
        let blocks = generate(3, 4);
        assert_eq!(
            blocks,
            vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9, 10, 11]]
        );
        assert_eq!(generate_from(2, 1, 4), vec![vec![8, 9, 10, 11]]);
        assert!(generate(0, 100).is_empty());
    }
}
