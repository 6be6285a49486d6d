//! Raw pulse-train passthrough.
//!
//! Encode-only: the send request carries the literal pulse train as a
//! space-separated string. The sender additionally feeds every raw
//! transmission back into the receive queue, which is the loopback path
//! used for self-tests and simulated hardware.

use crate::registry::{
    ArgType, ConfType, DecodeCaps, DeviceAlias, DeviceType, EncodeError, EncodedSend, Protocol,
    ProtocolDescriptor, ProtocolOption, VarType,
};
use pulse_core::{HwType, MAX_RAW_PULSES};
use serde_json::Value;

pub struct RawCode {
    descriptor: ProtocolDescriptor,
}

impl RawCode {
    pub fn new() -> Self {
        RawCode {
            descriptor: ProtocolDescriptor {
                id: "raw",
                devices: vec![DeviceAlias {
                    name: "raw",
                    description: "raw pulse trains",
                }],
                devtype: DeviceType::Raw,
                hwtype: HwType::Rf433,
                rawlen: 0,
                minrawlen: 0,
                maxrawlen: 0,
                plslens: vec![],
                pulse: 0,
                rxrpt: 1,
                txrpt: 1,
                lsb: 0,
                binlen: 0,
                caps: DecodeCaps::default(),
                options: vec![ProtocolOption::new(
                    'c',
                    "code",
                    ArgType::HasValue,
                    ConfType::Value,
                    VarType::String,
                    None,
                )],
            },
        }
    }
}

impl Protocol for RawCode {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn create_code(&self, params: &Value) -> Result<EncodedSend, EncodeError> {
        let code = params
            .get("code")
            .and_then(Value::as_str)
            .ok_or(EncodeError::Missing("code"))?;
        let mut raw = Vec::new();
        for token in code.split_whitespace() {
            let pulse = token.parse::<u32>().map_err(|_| EncodeError::Invalid {
                name: "code",
                value: token.to_string(),
            })?;
            raw.push(pulse);
        }
        if raw.is_empty() {
            return Err(EncodeError::Missing("code"));
        }
        if raw.len() > MAX_RAW_PULSES {
            return Err(EncodeError::Invalid {
                name: "code",
                value: format!("{} pulses", raw.len()),
            });
        }
        Ok(EncodedSend { raw, message: None })
    }
}
