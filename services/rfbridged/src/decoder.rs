//! Receive decoder: matches captured segments against the protocol registry
//! and turns them into broadcast events.
//!
//! Candidate selection, bit classification, repeat gating, and nibble
//! packing follow the pipeline contract:
//!
//! 1. hardware classes must be compatible (either side may be the wildcard);
//! 2. the protocol must decode something, have a pulse ratio, and declare
//!    reference pulse lengths;
//! 3. the segment's plslen must sit within ±5 µs of a declared reference;
//! 4. the raw length must equal the protocol's, or fall inside its band.
//!
//! `parse_raw` fires immediately per segment; `parse_code`/`parse_binary`
//! wait for `receive_repeats · rxrpt` observations inside 500 ms windows.
//! The firmware telemetry protocol bypasses the gate entirely.

use crate::queue::BroadcastTx;
use crate::registry::{Protocol, ProtocolRegistry, FIRMWARE_PROTOCOL};
use pulse_core::{
    bit_threshold, pack_nibbles, pulses_to_bits, trailing_group_dropped, PulseSegment, RepeatGate,
};
use rf_protocol::{BroadcastMessage, Origin};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub struct ReceiveDecoder {
    registry: Arc<ProtocolRegistry>,
    broadcast: BroadcastTx,
    receive_repeats: u32,
    /// Per-protocol repeat state; only this task touches it.
    gates: HashMap<&'static str, RepeatGate>,
    epoch: Instant,
}

impl ReceiveDecoder {
    pub fn new(registry: Arc<ProtocolRegistry>, broadcast: BroadcastTx, receive_repeats: u32) -> Self {
        ReceiveDecoder {
            registry,
            broadcast,
            receive_repeats,
            gates: HashMap::new(),
            epoch: Instant::now(),
        }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PulseSegment>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                segment = rx.recv() => match segment {
                    None => break,
                    Some(segment) => self.decode(&segment),
                },
            }
        }
    }

    /// Run one segment through every candidate protocol.
    pub fn decode(&mut self, segment: &PulseSegment) {
        let now_us = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        for protocol in self.registry.iter() {
            let d = protocol.descriptor();
            if !segment.hwtype.matches(d.hwtype) {
                continue;
            }
            let has_length = d.rawlen > 0 || (d.minrawlen > 0 && d.maxrawlen > 0);
            let decodes = ((d.caps.raw || d.caps.code) && has_length) || d.caps.binary;
            if !decodes || d.pulse == 0 || d.plslens.is_empty() {
                continue;
            }
            let Some(&reference) = d.plslens.iter().find(|&&l| segment.plslen_matches(l)) else {
                continue;
            };
            let length_ok = segment.rawlen() == d.rawlen
                || (d.minrawlen > 0
                    && d.maxrawlen > 0
                    && segment.rawlen() >= d.minrawlen
                    && segment.rawlen() <= d.maxrawlen);
            if !length_ok {
                continue;
            }

            if d.caps.raw {
                debug!(plslen = segment.plslen, protocol = d.id, "parse_raw candidate");
                if let Some(message) = protocol.parse_raw(segment) {
                    self.emit(d.id, message, None);
                }
            }

            let threshold = bit_threshold(reference, d.pulse);
            let code = pulses_to_bits(&segment.raw, threshold);

            let repeats = self
                .gates
                .entry(d.id)
                .or_insert_with(RepeatGate::new)
                .observe(now_us);

            if repeats >= self.receive_repeats * d.rxrpt || d.id == FIRMWARE_PROTOCOL {
                if d.caps.code {
                    debug!(repeats, protocol = d.id, "calling parse_code");
                    if let Some(message) = protocol.parse_code(&code) {
                        self.emit(d.id, message, Some(i64::from(repeats)));
                    }
                }
                if d.caps.binary {
                    self.decode_binary(protocol.as_ref(), segment, &code, threshold, repeats);
                }
            }
        }
    }

    fn decode_binary(
        &self,
        protocol: &dyn Protocol,
        segment: &PulseSegment,
        code: &[u8],
        threshold: u32,
        repeats: u32,
    ) {
        let d = protocol.descriptor();
        let nibbles = pack_nibbles(code, d.lsb);
        let mut groups = nibbles.len();
        if trailing_group_dropped(&segment.raw, threshold) {
            groups = groups.saturating_sub(1);
        }
        let expected = if d.binlen > 0 {
            d.binlen
        } else {
            segment.rawlen() / 4
        };
        if groups != expected {
            return;
        }
        debug!(groups, protocol = d.id, "calling parse_binary");
        if let Some(message) = protocol.parse_binary(&nibbles[..groups]) {
            self.emit(d.id, message, Some(i64::from(repeats)));
        }
    }

    fn emit(&self, protocol: &str, message: Value, repeats: Option<i64>) {
        if !message.is_object() {
            return;
        }
        let mut envelope = BroadcastMessage::new(Origin::Receiver, protocol, message);
        envelope.repeats = repeats;
        self.broadcast.push(envelope);
    }
}
