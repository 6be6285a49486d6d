//! Transceiver firmware telemetry.
//!
//! The attached transceiver firmware periodically reports its version and
//! filter configuration as a 196-pulse frame (49 nibble groups; the long
//! start pulse keeps the tail group). Exempt from repeat gating, so the
//! report surfaces on the first match, and the broadcaster mirrors the
//! fields into the process-global firmware record.

use crate::protocols::bits_to_u32;
use crate::registry::{
    ArgType, ConfType, DecodeCaps, DeviceAlias, DeviceType, Protocol, ProtocolDescriptor,
    ProtocolOption, VarType,
};
use pulse_core::HwType;
use serde_json::{json, Value};

pub struct FirmwareTelemetry {
    descriptor: ProtocolDescriptor,
}

impl FirmwareTelemetry {
    pub fn new() -> Self {
        let value_option = |short, name| {
            ProtocolOption::new(
                short,
                name,
                ArgType::HasValue,
                ConfType::Value,
                VarType::Number,
                None,
            )
        };
        FirmwareTelemetry {
            descriptor: ProtocolDescriptor {
                id: "firmware",
                devices: vec![DeviceAlias {
                    name: "firmware",
                    description: "transceiver firmware telemetry",
                }],
                devtype: DeviceType::Proc,
                hwtype: HwType::Any,
                rawlen: 196,
                minrawlen: 0,
                maxrawlen: 0,
                plslens: vec![225],
                pulse: 3,
                rxrpt: 1,
                txrpt: 1,
                lsb: 0,
                binlen: 49,
                caps: DecodeCaps {
                    raw: false,
                    code: false,
                    binary: true,
                },
                options: vec![
                    value_option('v', "version"),
                    value_option('l', "lpf"),
                    value_option('h', "hpf"),
                ],
            },
        }
    }
}

impl Protocol for FirmwareTelemetry {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn parse_binary(&self, binary: &[u8]) -> Option<Value> {
        if binary.len() < 48 {
            return None;
        }
        let version = bits_to_u32(&binary[0..16]);
        let lpf = bits_to_u32(&binary[16..32]);
        let hpf = bits_to_u32(&binary[32..48]);
        Some(json!({ "version": version, "lpf": lpf, "hpf": hpf }))
    }
}
