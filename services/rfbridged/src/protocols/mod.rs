//! Bundled protocol plugins.
//!
//! Protocol identity is data: the pipeline only ever sees the
//! [`crate::registry::Protocol`] contract. The set registered here covers
//! the shipped device families plus the two internal ids (`firmware`,
//! `process`) the daemon itself publishes under.

use crate::registry::ProtocolRegistry;
use std::sync::Arc;

mod alecto_ws;
mod firmware;
mod kaku_switch;
mod process;
mod raw;

pub use alecto_ws::AlectoWs;
pub use firmware::FirmwareTelemetry;
pub use kaku_switch::KakuSwitch;
pub use process::ProcessStats;
pub use raw::RawCode;

/// Build the startup registry with every bundled plugin.
pub fn register_all() -> ProtocolRegistry {
    let mut registry = ProtocolRegistry::new();
    registry.register(Arc::new(KakuSwitch::new()));
    registry.register(Arc::new(AlectoWs::new()));
    registry.register(Arc::new(RawCode::new()));
    registry.register(Arc::new(FirmwareTelemetry::new()));
    registry.register(Arc::new(ProcessStats::new()));
    registry
}

/// Interpret a run of bits (one per slice entry, MSB first) as an integer.
pub(crate) fn bits_to_u32(bits: &[u8]) -> u32 {
    bits.iter().fold(0, |acc, &b| (acc << 1) | u32::from(b))
}
