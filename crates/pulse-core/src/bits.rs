//! Pulse-to-bit classification and nibble packing.
//!
//! Protocols encode bits as short/long pulse pairs. The threshold between
//! "short" and "long" is derived from the segment's reference pulse length
//! and the protocol's pulse ratio; everything at or above the threshold is a
//! one-bit.

/// Classification threshold for a reference pulse length and a protocol's
/// short/long ratio divisor.
pub fn bit_threshold(plslen: u32, ratio: u32) -> u32 {
    plslen * (1 + ratio) / 2
}

/// Classify raw pulse durations into 0/1 bits against `threshold`.
pub fn pulses_to_bits(raw: &[u32], threshold: u32) -> Vec<u8> {
    raw.iter().map(|&d| u8::from(d >= threshold)).collect()
}

/// Pack classified bits into 4-bit groups, sampling one bit per group at
/// offset `lsb`. Returns one entry per group, `ceil(code.len() / 4)` of
/// them; a sample falling past the end of `code` reads as 0.
pub fn pack_nibbles(code: &[u8], lsb: usize) -> Vec<u8> {
    (0..code.len())
        .step_by(4)
        .map(|x| code.get(x + lsb).copied().unwrap_or(0))
        .collect()
}

/// Whether the trailing partial group must be discarded: the second raw
/// pulse not clearing 2.1× the threshold marks a header-less framing where
/// the last group is padding.
pub fn trailing_group_dropped(raw: &[u32], threshold: u32) -> bool {
    match raw.get(1) {
        Some(&second) => (f64::from(second) / f64::from(threshold)) < 2.1,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_uses_integer_arithmetic() {
        // 270 * (1 + 3) / 2 = 540
        assert_eq!(bit_threshold(270, 3), 540);
        assert_eq!(bit_threshold(271, 3), 542);
    }

    #[test]
    fn pulses_at_threshold_are_ones() {
        let bits = pulses_to_bits(&[539, 540, 541, 270], 540);
        assert_eq!(bits, vec![0, 1, 1, 0]);
    }

    #[test]
    fn nibble_packing_samples_lsb_offset() {
        let code = vec![1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0];
        assert_eq!(pack_nibbles(&code, 0), vec![1, 0, 0]);
        assert_eq!(pack_nibbles(&code, 1), vec![0, 1, 0]);
        assert_eq!(pack_nibbles(&code, 2), vec![0, 0, 1]);
    }

    #[test]
    fn packing_partial_tail_reads_missing_bits_as_zero() {
        let code = vec![1, 1, 1, 1, 1, 1];
        assert_eq!(pack_nibbles(&code, 0), vec![1, 1]);
        assert_eq!(pack_nibbles(&code, 3), vec![1, 0]);
    }

    #[test]
    fn trailing_drop_decision() {
        // 1133 / 540 = 2.098… < 2.1 → drop; 1134 / 540 = 2.1 → keep.
        assert!(trailing_group_dropped(&[270, 1133], 540));
        assert!(!trailing_group_dropped(&[270, 1134], 540));
    }
}
