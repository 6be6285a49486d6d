//! Alecto-style wireless weather sensors.
//!
//! Receive-only. 74 pulses per frame: 72 data pulses in 18 groups of four,
//! a trailing sync pulse, and the footer. The decoder samples one bit per
//! group (offset 1) and the short second pulse always drops the partial
//! tail group, leaving exactly the 18-bit payload: an 8-bit sensor id and a
//! 10-bit temperature in tenths of a degree.

use crate::protocols::bits_to_u32;
use crate::registry::{
    ArgType, ConfType, DecodeCaps, DeviceAlias, DeviceType, Protocol, ProtocolDescriptor,
    ProtocolOption, VarType,
};
use pulse_core::HwType;
use serde_json::{json, Value};

const BINLEN: usize = 18;

pub struct AlectoWs {
    descriptor: ProtocolDescriptor,
}

impl AlectoWs {
    pub fn new() -> Self {
        AlectoWs {
            descriptor: ProtocolDescriptor {
                id: "alecto_ws",
                devices: vec![DeviceAlias {
                    name: "alecto_ws",
                    description: "Alecto weather stations",
                }],
                devtype: DeviceType::Weather,
                hwtype: HwType::Rf433,
                rawlen: 74,
                minrawlen: 0,
                maxrawlen: 0,
                plslens: vec![270],
                pulse: 3,
                rxrpt: 1,
                txrpt: 1,
                lsb: 1,
                binlen: BINLEN,
                caps: DecodeCaps {
                    raw: false,
                    code: false,
                    binary: true,
                },
                options: vec![
                    ProtocolOption::new(
                        'i',
                        "id",
                        ArgType::HasValue,
                        ConfType::Id,
                        VarType::Number,
                        Some("^([0-9]{1,3})$"),
                    ),
                    ProtocolOption::new(
                        't',
                        "temperature",
                        ArgType::HasValue,
                        ConfType::Value,
                        VarType::Number,
                        None,
                    ),
                    ProtocolOption::setting("device-decimals", VarType::Number, Some("^[0-9]$")),
                    ProtocolOption::setting(
                        "device-temperature-offset",
                        VarType::Number,
                        Some("^-?[0-9]{1,3}$"),
                    ),
                ],
            },
        }
    }
}

impl Protocol for AlectoWs {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn parse_binary(&self, binary: &[u8]) -> Option<Value> {
        if binary.len() < BINLEN {
            return None;
        }
        let id = bits_to_u32(&binary[0..8]);
        let tenths = bits_to_u32(&binary[8..18]);
        let temperature = f64::from(tenths) / 10.0;
        Some(json!({ "id": id, "temperature": temperature }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payload_decodes_id_and_temperature() {
        let proto = AlectoWs::new();
        // id 0b0000_0101 = 5, temperature 0b00_1101_0101 = 213 → 21.3 °C
        let mut bits = vec![0u8; BINLEN];
        bits[5] = 1;
        bits[7] = 1;
        for (i, b) in [0, 0, 1, 1, 0, 1, 0, 1, 0, 1].iter().enumerate() {
            bits[8 + i] = *b;
        }
        assert_eq!(
            proto.parse_binary(&bits).unwrap(),
            json!({"id": 5, "temperature": 21.3})
        );
    }

    #[test]
    fn short_payload_is_rejected() {
        let proto = AlectoWs::new();
        assert!(proto.parse_binary(&[0; 17]).is_none());
    }
}
