//! Pulse-domain primitives for the 433 MHz bridge.
//!
//! Everything in this crate is pure logic over pulse durations: no sockets,
//! no clocks, no hardware. The daemon feeds durations in and gets segments,
//! bits, and repeat decisions back, which keeps every timing law testable
//! without a radio attached.
//!
//! # Terms
//!
//! A *pulse* is the number of microseconds between two successive RF level
//! transitions. A burst of pulses terminated by a long *footer* pulse forms a
//! segment; the footer also yields the *plslen* (reference short-pulse
//! length) that downstream protocol matching keys on.

use serde::{Deserialize, Serialize};
use std::fmt;

mod bits;
mod gate;
mod segment;

pub use bits::{bit_threshold, pack_nibbles, pulses_to_bits, trailing_group_dropped};
pub use gate::RepeatGate;
pub use segment::SegmentAssembler;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Divisor applied to a footer pulse to derive the reference short-pulse
/// length (plslen).
pub const PULSE_DIV: u32 = 34;

/// Pulses longer than this are treated as packet footers.
pub const FOOTER_MIN_US: u32 = 4440;

/// A derived plslen at or above this ceiling is discarded (footer capped at
/// 100 000 µs + change).
pub const PLSLEN_CEILING: u32 = 3000;

/// Maximum number of pulses held in a capture buffer before it wraps.
pub const MAX_RAW_PULSES: usize = 255;

/// Matching tolerance around a protocol's allowed plslen, in microseconds.
pub const PLSLEN_TOLERANCE: u32 = 5;

/// Segments arriving further apart than this window reset a protocol's
/// repeat counter.
pub const REPEAT_WINDOW_US: u64 = 500_000;

// ---------------------------------------------------------------------------
// HwType
// ---------------------------------------------------------------------------

/// The hardware class a pulse segment originated from, or that a protocol
/// listens on. `Any` is a wildcard on either side of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwType {
    Any,
    Rf433,
    Sensor,
    Api,
}

impl HwType {
    /// Whether a segment tagged `self` is acceptable to a listener tagged
    /// `other`. The wildcard matches in both directions.
    pub fn matches(self, other: HwType) -> bool {
        self == HwType::Any || other == HwType::Any || self == other
    }
}

impl fmt::Display for HwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwType::Any => write!(f, "any"),
            HwType::Rf433 => write!(f, "rf433"),
            HwType::Sensor => write!(f, "sensor"),
            HwType::Api => write!(f, "api"),
        }
    }
}

// ---------------------------------------------------------------------------
// PulseSegment
// ---------------------------------------------------------------------------

/// A captured pulse burst: the raw durations (footer included), the derived
/// reference pulse length, and the originating hardware class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseSegment {
    /// Microsecond durations, at most [`MAX_RAW_PULSES`] of them.
    pub raw: Vec<u32>,
    /// Reference short-pulse length derived from the footer; 0 when no valid
    /// footer has been seen yet.
    pub plslen: u32,
    pub hwtype: HwType,
}

impl PulseSegment {
    pub fn rawlen(&self) -> usize {
        self.raw.len()
    }

    /// Whether `plslen` falls within the ±[`PLSLEN_TOLERANCE`] band around
    /// `reference`.
    pub fn plslen_matches(&self, reference: u32) -> bool {
        let lo = reference.saturating_sub(PLSLEN_TOLERANCE);
        let hi = reference + PLSLEN_TOLERANCE;
        self.plslen >= lo && self.plslen <= hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwtype_wildcard_matches_both_directions() {
        assert!(HwType::Any.matches(HwType::Rf433));
        assert!(HwType::Rf433.matches(HwType::Any));
        assert!(HwType::Rf433.matches(HwType::Rf433));
        assert!(!HwType::Rf433.matches(HwType::Sensor));
    }

    #[test]
    fn plslen_tolerance_band_is_inclusive() {
        let seg = |plslen| PulseSegment {
            raw: vec![270, 9180],
            plslen,
            hwtype: HwType::Rf433,
        };
        assert!(seg(265).plslen_matches(270));
        assert!(seg(275).plslen_matches(270));
        assert!(!seg(264).plslen_matches(270));
        assert!(!seg(276).plslen_matches(270));
    }
}
