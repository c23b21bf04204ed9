use bytes::Bytes;

/// Deterministic pseudo-random payload; the same seed yields the same bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed;
    let mut data = Vec::with_capacity(len + 8);
    while data.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        data.extend_from_slice(&state.to_le_bytes());
    }
    data.truncate(len);
    Bytes::from(data)
}

/// Split `data` at the given (sorted, in-range) cut points.
#[allow(dead_code)]
pub fn split_at_points(data: &Bytes, cuts: &[usize]) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        pieces.push(data.slice(start..cut));
        start = cut;
    }
    pieces.push(data.slice(start..));
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(7, 100), seeded_bytes(7, 100));
        assert_ne!(seeded_bytes(7, 100), seeded_bytes(8, 100));
        assert_eq!(seeded_bytes(7, 13).len(), 13);
    }

    #[test]
    fn test_split_at_points_covers_input() {
        let data = seeded_bytes(1, 10);
        let pieces = split_at_points(&data, &[3, 3, 7]);
        assert_eq!(pieces.len(), 4);
        assert!(pieces[1].is_empty());
        assert_eq!(pieces.concat(), data.to_vec());
    }
}
