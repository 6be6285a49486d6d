//! Protocol registry and the plugin contract.
//!
//! A protocol plugin is a descriptor (timing metadata + option schema) plus
//! decode/encode callbacks returning owned values. The registry is built
//! once at startup and append-only afterwards; device lookup is a linear
//! scan used only on the inbound send path.

use pulse_core::{HwType, PulseSegment};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Protocol id exempt from repeat gating and feeding the firmware record.
pub const FIRMWARE_PROTOCOL: &str = "firmware";

// ---------------------------------------------------------------------------
// Option schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    NoValue,
    HasValue,
}

/// What a schema row means to the config layer: device identity, reported
/// value, per-device setting, device state, or an optional send parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfType {
    Id,
    Value,
    Setting,
    State,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Number,
    String,
}

/// One row of a protocol's option schema. The schema drives code→JSON
/// lifting on send, JSON→code lowering on control, and state-field
/// discovery.
#[derive(Debug, Clone)]
pub struct ProtocolOption {
    pub short: Option<char>,
    pub name: &'static str,
    pub argtype: ArgType,
    pub conftype: ConfType,
    pub vartype: VarType,
    pub pattern: Option<&'static str>,
}

impl ProtocolOption {
    pub fn new(
        short: char,
        name: &'static str,
        argtype: ArgType,
        conftype: ConfType,
        vartype: VarType,
        pattern: Option<&'static str>,
    ) -> Self {
        ProtocolOption {
            short: Some(short),
            name,
            argtype,
            conftype,
            vartype,
            pattern,
        }
    }

    pub fn setting(name: &'static str, vartype: VarType, pattern: Option<&'static str>) -> Self {
        ProtocolOption {
            short: None,
            name,
            argtype: ArgType::HasValue,
            conftype: ConfType::Setting,
            vartype,
            pattern,
        }
    }

    /// Validate a JSON value against the row's type and pattern.
    pub fn validates(&self, value: &Value) -> bool {
        let text = match (self.vartype, value) {
            (VarType::Number, Value::Number(n)) => n.to_string(),
            (VarType::String, Value::String(s)) => s.clone(),
            _ => return false,
        };
        match self.pattern {
            None => true,
            Some(p) => Regex::new(p).map(|re| re.is_match(&text)).unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Broad device class, reported in config patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Raw = 0,
    Switch = 1,
    Dimmer = 2,
    Weather = 3,
    Relay = 4,
    Contact = 5,
    Proc = 6,
}

/// Which decode callbacks a plugin implements.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeCaps {
    pub raw: bool,
    pub code: bool,
    pub binary: bool,
}

/// A device-name alias a protocol answers to on the send path.
#[derive(Debug, Clone)]
pub struct DeviceAlias {
    pub name: &'static str,
    pub description: &'static str,
}

/// Immutable protocol metadata. `rawlen == 0` means the protocol uses the
/// `minrawlen..=maxrawlen` band (or, for encode-only protocols, no length
/// filter at all).
#[derive(Debug, Clone)]
pub struct ProtocolDescriptor {
    pub id: &'static str,
    pub devices: Vec<DeviceAlias>,
    pub devtype: DeviceType,
    pub hwtype: HwType,
    pub rawlen: usize,
    pub minrawlen: usize,
    pub maxrawlen: usize,
    /// Allowed reference pulse lengths, matched with ±5 µs tolerance.
    pub plslens: Vec<u32>,
    /// Short/long ratio divisor for bit classification.
    pub pulse: u32,
    /// Minimum receive repeats (multiplied by the daemon-wide factor).
    pub rxrpt: u32,
    /// Transmit repeats (multiplied by the daemon-wide factor).
    pub txrpt: u32,
    /// Bit-sample offset inside each 4-pulse group.
    pub lsb: usize,
    /// Expected nibble-group count for `parse_binary`; 0 derives it from the
    /// raw length.
    pub binlen: usize,
    pub caps: DecodeCaps,
    pub options: Vec<ProtocolOption>,
}

impl ProtocolDescriptor {
    pub fn option(&self, name: &str) -> Option<&ProtocolOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn options_of(&self, conftype: ConfType) -> impl Iterator<Item = &ProtocolOption> {
        self.options.iter().filter(move |o| o.conftype == conftype)
    }
}

// ---------------------------------------------------------------------------
// Plugin trait
// ---------------------------------------------------------------------------

/// An encoded transmission: the pulse train to put on the air and the
/// message confirming what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSend {
    pub raw: Vec<u32>,
    pub message: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("insufficient arguments: missing {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("protocol does not support sending")]
    Unsupported,
}

/// The protocol plugin contract. Decode callbacks take the decoder's views
/// of a segment and return owned messages; no shared scratch state.
pub trait Protocol: Send + Sync {
    fn descriptor(&self) -> &ProtocolDescriptor;

    /// Decode straight from raw pulse durations (pre-classification).
    fn parse_raw(&self, _segment: &PulseSegment) -> Option<Value> {
        None
    }

    /// Decode from classified 0/1 bits, one per pulse.
    fn parse_code(&self, _code: &[u8]) -> Option<Value> {
        None
    }

    /// Decode from packed nibble-group bits.
    fn parse_binary(&self, _binary: &[u8]) -> Option<Value> {
        None
    }

    /// Encode a send request's code object into a pulse train.
    fn create_code(&self, _params: &Value) -> Result<EncodedSend, EncodeError> {
        Err(EncodeError::Unsupported)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: Vec<Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        ProtocolRegistry::default()
    }

    pub fn register(&mut self, protocol: Arc<dyn Protocol>) {
        self.protocols.push(protocol);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Protocol>> {
        self.protocols.iter()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols
            .iter()
            .find(|p| p.descriptor().id == id)
            .cloned()
    }

    /// Resolve a device name from a send request against protocol aliases.
    pub fn find_by_device(&self, name: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols
            .iter()
            .find(|p| p.descriptor().devices.iter().any(|d| d.name == name))
            .cloned()
    }

    /// Global capture bounds derived across every registered protocol; the
    /// capture loop discards bursts outside them.
    pub fn rawlen_bounds(&self) -> (usize, usize) {
        let mut min = 1000;
        let mut max = 0;
        for p in &self.protocols {
            let d = p.descriptor();
            if d.rawlen > 0 && d.rawlen < min {
                min = d.rawlen;
            }
            if d.minrawlen > 0 && d.minrawlen < min {
                min = d.minrawlen;
            }
            if d.rawlen > max {
                max = d.rawlen;
            }
            if d.maxrawlen > max {
                max = d.maxrawlen;
            }
        }
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols;
    use serde_json::json;

    #[test]
    fn option_validation_checks_type_and_pattern() {
        let opt = ProtocolOption::new(
            'i',
            "id",
            ArgType::HasValue,
            ConfType::Id,
            VarType::Number,
            Some("^([0-9]{1,5})$"),
        );
        assert!(opt.validates(&json!(42)));
        assert!(!opt.validates(&json!("42")));
        assert!(!opt.validates(&json!(123_456)));
    }

    #[test]
    fn rawlen_bounds_span_the_registry() {
        let registry = protocols::register_all();
        let (min, max) = registry.rawlen_bounds();
        assert_eq!(min, 50);
        assert_eq!(max, 196);
    }

    #[test]
    fn device_lookup_resolves_aliases() {
        let registry = protocols::register_all();
        assert_eq!(
            registry.find_by_device("kaku_switch").unwrap().descriptor().id,
            "kaku_switch"
        );
        assert!(registry.find_by_device("no_such_device").is_none());
    }
}
