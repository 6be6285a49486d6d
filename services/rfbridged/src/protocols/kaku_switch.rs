//! KlikAanKlikUit-style remote switches.
//!
//! Frame layout: one short header pulse, 48 data pulses, one footer. Each
//! logical bit is a pulse pair (long/short encodes 1, short/long encodes 0),
//! giving 24 bits: a 16-bit address, a 7-bit unit, and the state bit.

use crate::protocols::bits_to_u32;
use crate::registry::{
    ArgType, ConfType, DecodeCaps, DeviceAlias, DeviceType, EncodeError, EncodedSend, Protocol,
    ProtocolDescriptor, ProtocolOption, VarType,
};
use pulse_core::HwType;
use serde_json::{json, Value};

const RAWLEN: usize = 50;
const SHORT: u32 = 270;
const LONG: u32 = 810;
const FOOTER: u32 = 9180;

const MAX_ID: u32 = 65_535;
const MAX_UNIT: u32 = 127;

pub struct KakuSwitch {
    descriptor: ProtocolDescriptor,
}

impl KakuSwitch {
    pub fn new() -> Self {
        KakuSwitch {
            descriptor: ProtocolDescriptor {
                id: "kaku_switch",
                devices: vec![DeviceAlias {
                    name: "kaku_switch",
                    description: "KlikAanKlikUit switches",
                }],
                devtype: DeviceType::Switch,
                hwtype: HwType::Rf433,
                rawlen: RAWLEN,
                minrawlen: 0,
                maxrawlen: 0,
                plslens: vec![SHORT],
                pulse: 3,
                rxrpt: 2,
                txrpt: 1,
                lsb: 0,
                binlen: 0,
                caps: DecodeCaps {
                    raw: false,
                    code: true,
                    binary: false,
                },
                options: vec![
                    ProtocolOption::new(
                        'i',
                        "id",
                        ArgType::HasValue,
                        ConfType::Id,
                        VarType::Number,
                        Some("^([0-9]{1,5})$"),
                    ),
                    ProtocolOption::new(
                        'u',
                        "unit",
                        ArgType::HasValue,
                        ConfType::Id,
                        VarType::Number,
                        Some("^([0-9]{1,3})$"),
                    ),
                    ProtocolOption::new('t', "on", ArgType::NoValue, ConfType::State, VarType::Number, None),
                    ProtocolOption::new('f', "off", ArgType::NoValue, ConfType::State, VarType::Number, None),
                ],
            },
        }
    }

    fn number(params: &Value, name: &'static str) -> Option<u32> {
        params.get(name)?.as_u64().and_then(|n| u32::try_from(n).ok())
    }
}

impl Protocol for KakuSwitch {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn parse_code(&self, code: &[u8]) -> Option<Value> {
        if code.len() < RAWLEN {
            return None;
        }
        // Logical bit i is the first pulse of pair i, after the header.
        let bits: Vec<u8> = (0..24).map(|i| code[1 + 2 * i]).collect();
        let id = bits_to_u32(&bits[0..16]);
        let unit = bits_to_u32(&bits[16..23]);
        let state = if bits[23] == 1 { "on" } else { "off" };
        Some(json!({ "id": id, "unit": unit, "state": state }))
    }

    fn create_code(&self, params: &Value) -> Result<EncodedSend, EncodeError> {
        let id = Self::number(params, "id").ok_or(EncodeError::Missing("id"))?;
        let unit = Self::number(params, "unit").ok_or(EncodeError::Missing("unit"))?;
        let on = params.get("on").is_some();
        let off = params.get("off").is_some();
        if !on && !off {
            return Err(EncodeError::Missing("on/off"));
        }
        if id > MAX_ID {
            return Err(EncodeError::Invalid {
                name: "id",
                value: id.to_string(),
            });
        }
        if unit > MAX_UNIT {
            return Err(EncodeError::Invalid {
                name: "unit",
                value: unit.to_string(),
            });
        }

        let mut bits = [0u8; 24];
        for (i, bit) in bits.iter_mut().take(16).enumerate() {
            *bit = ((id >> (15 - i)) & 1) as u8;
        }
        for (i, bit) in bits.iter_mut().skip(16).take(7).enumerate() {
            *bit = ((unit >> (6 - i)) & 1) as u8;
        }
        bits[23] = u8::from(on);

        let mut raw = Vec::with_capacity(RAWLEN);
        raw.push(SHORT);
        for &bit in &bits {
            if bit == 1 {
                raw.push(LONG);
                raw.push(SHORT);
            } else {
                raw.push(SHORT);
                raw.push(LONG);
            }
        }
        raw.push(FOOTER);

        let state = if on { "on" } else { "off" };
        Ok(EncodedSend {
            raw,
            message: Some(json!({ "id": id, "unit": unit, "state": state })),
        })
    }
}
