//! Descriptor for the daemon's own resource telemetry.
//!
//! No decode or encode callbacks; the self monitor publishes under this id
//! directly. The option schema exists so clients can discover the fields.

use crate::registry::{
    ArgType, ConfType, DecodeCaps, DeviceAlias, DeviceType, Protocol, ProtocolDescriptor,
    ProtocolOption, VarType,
};
use pulse_core::HwType;

pub struct ProcessStats {
    descriptor: ProtocolDescriptor,
}

impl ProcessStats {
    pub fn new() -> Self {
        ProcessStats {
            descriptor: ProtocolDescriptor {
                id: "process",
                devices: vec![DeviceAlias {
                    name: "process",
                    description: "daemon resource usage",
                }],
                devtype: DeviceType::Proc,
                hwtype: HwType::Api,
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
                options: vec![
                    ProtocolOption::new(
                        'c',
                        "cpu",
                        ArgType::HasValue,
                        ConfType::Value,
                        VarType::Number,
                        None,
                    ),
                    ProtocolOption::new(
                        'r',
                        "ram",
                        ArgType::HasValue,
                        ConfType::Value,
                        VarType::Number,
                        None,
                    ),
                ],
            },
        }
    }
}

impl Protocol for ProcessStats {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }
}
