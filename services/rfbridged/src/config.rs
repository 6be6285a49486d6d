//! Daemon settings loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/rfbridge/rfbridged.toml`.
//!
//! # Sections
//! - `[server]`: control-plane port, standalone flag
//! - `[daemon]`: pid file path
//! - `[pipeline]`: receive/send repeat factors
//! - `[master]`: optional upstream daemon (node mode)
//! - `[[hardware]]`: attached radio drivers
//! - `[[locations]]` / `[[locations.devices]]`: the device registry

use pulse_core::HwType;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/rfbridge/rfbridged.toml";

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_PID_FILE: &str = "/var/run/rfbridged.pid";
const DEFAULT_RECEIVE_REPEATS: u32 = 2;
const DEFAULT_SEND_REPEATS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub daemon: DaemonSettings,
    pub pipeline: PipelineSettings,
    pub master: Option<MasterSettings>,
    pub hardware: Vec<HardwareSettings>,
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    /// Standalone daemons never probe for an upstream peer.
    pub standalone: bool,
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub pid_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub receive_repeats: u32,
    pub send_repeats: u32,
}

#[derive(Debug, Clone)]
pub struct MasterSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub enum HardwareSettings {
    Serial433 { device: PathBuf },
    /// Channel-backed driver for simulated setups; `hwtype` picks the class
    /// it reports.
    Loopback { hwtype: HwType },
    None,
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub id: String,
    pub name: String,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub protocol: Vec<String>,
    pub state: Option<String>,
    /// Identity option values ({"id": 4, "unit": 1}) matched on decode.
    pub ids: Map<String, Value>,
    /// Per-device setting overrides lifted into send confirmations.
    pub settings: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (Option for every optional field)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    server: Option<RawServer>,
    daemon: Option<RawDaemon>,
    pipeline: Option<RawPipeline>,
    master: Option<RawMaster>,
    hardware: Option<Vec<RawHardware>>,
    locations: Option<Vec<RawLocation>>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    port: Option<u16>,
    standalone: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawDaemon {
    pid_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    receive_repeats: Option<u32>,
    send_repeats: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawMaster {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawHardware {
    kind: Option<String>,
    device: Option<PathBuf>,
    hwtype: Option<HwType>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    id: Option<String>,
    name: Option<String>,
    devices: Option<Vec<RawDevice>>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    id: Option<String>,
    name: Option<String>,
    protocol: Option<Vec<String>>,
    state: Option<String>,
    ids: Option<Map<String, Value>>,
    settings: Option<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_config_from(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    resolve(&text)
}

pub fn resolve(text: &str) -> Result<Settings, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    if let Some(v) = raw.schema_version {
        if v != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported schema_version {v}"
            )));
        }
    }

    let server = raw.server.unwrap_or(RawServer {
        port: None,
        standalone: None,
    });
    let pipeline = raw.pipeline.unwrap_or(RawPipeline {
        receive_repeats: None,
        send_repeats: None,
    });

    let master = match raw.master {
        None => None,
        Some(m) => {
            let host = m
                .host
                .ok_or_else(|| ConfigError::Invalid("master.host is required".into()))?;
            Some(MasterSettings {
                host,
                port: m.port.unwrap_or(DEFAULT_PORT),
            })
        }
    };

    let mut hardware = Vec::new();
    for (i, hw) in raw.hardware.unwrap_or_default().into_iter().enumerate() {
        let kind = hw
            .kind
            .ok_or_else(|| ConfigError::Invalid(format!("hardware[{i}].kind is required")))?;
        hardware.push(match kind.as_str() {
            "serial433" => HardwareSettings::Serial433 {
                device: hw.device.ok_or_else(|| {
                    ConfigError::Invalid(format!("hardware[{i}].device is required"))
                })?,
            },
            "loopback" => HardwareSettings::Loopback {
                hwtype: hw.hwtype.unwrap_or(HwType::Api),
            },
            "none" => HardwareSettings::None,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown hardware kind \"{other}\""
                )))
            }
        });
    }

    let mut locations = Vec::new();
    for (i, loc) in raw.locations.unwrap_or_default().into_iter().enumerate() {
        let id = loc
            .id
            .ok_or_else(|| ConfigError::Invalid(format!("locations[{i}].id is required")))?;
        let mut devices = Vec::new();
        for (j, dev) in loc.devices.unwrap_or_default().into_iter().enumerate() {
            let dev_id = dev.id.ok_or_else(|| {
                ConfigError::Invalid(format!("locations[{i}].devices[{j}].id is required"))
            })?;
            let protocol = dev.protocol.unwrap_or_default();
            if protocol.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device \"{dev_id}\" names no protocol"
                )));
            }
            devices.push(DeviceConfig {
                name: dev.name.unwrap_or_else(|| dev_id.clone()),
                id: dev_id,
                protocol,
                state: dev.state,
                ids: dev.ids.unwrap_or_default(),
                settings: dev.settings.unwrap_or_default(),
            });
        }
        locations.push(LocationConfig {
            name: loc.name.unwrap_or_else(|| id.clone()),
            id,
            devices,
        });
    }

    Ok(Settings {
        server: ServerSettings {
            port: server.port.unwrap_or(DEFAULT_PORT),
            standalone: server.standalone.unwrap_or(false),
        },
        daemon: DaemonSettings {
            pid_file: raw
                .daemon
                .and_then(|d| d.pid_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
        },
        pipeline: PipelineSettings {
            receive_repeats: pipeline.receive_repeats.unwrap_or(DEFAULT_RECEIVE_REPEATS),
            send_repeats: pipeline.send_repeats.unwrap_or(DEFAULT_SEND_REPEATS),
        },
        master,
        hardware,
        locations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let settings = resolve("").unwrap();
        assert_eq!(settings.server.port, DEFAULT_PORT);
        assert!(!settings.server.standalone);
        assert_eq!(settings.pipeline.receive_repeats, 2);
        assert_eq!(settings.pipeline.send_repeats, 10);
        assert!(settings.master.is_none());
    }

    #[test]
    fn full_config_parses() {
        let text = r#"
            schema_version = 1

            [server]
            port = 5001
            standalone = true

            [pipeline]
            receive_repeats = 3

            [[hardware]]
            kind = "loopback"
            hwtype = "rf433"

            [[locations]]
            id = "living"
            name = "Living room"

            [[locations.devices]]
            id = "lamp"
            name = "Corner lamp"
            protocol = ["kaku_switch"]
            state = "off"

            [locations.devices.ids]
            id = 4
            unit = 1
        "#;
        let settings = resolve(text).unwrap();
        assert_eq!(settings.server.port, 5001);
        assert!(settings.server.standalone);
        assert_eq!(settings.pipeline.receive_repeats, 3);
        assert!(matches!(
            settings.hardware[0],
            HardwareSettings::Loopback {
                hwtype: HwType::Rf433
            }
        ));
        let lamp = &settings.locations[0].devices[0];
        assert_eq!(lamp.protocol, vec!["kaku_switch"]);
        assert_eq!(lamp.ids.get("id"), Some(&Value::from(4)));
    }

    #[test]
    fn unknown_hardware_kind_is_rejected() {
        let err = resolve("[[hardware]]\nkind = \"warp\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn device_without_protocol_is_rejected() {
        let text = r#"
            [[locations]]
            id = "attic"
            [[locations.devices]]
            id = "fan"
        "#;
        assert!(resolve(text).is_err());
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        assert!(resolve("schema_version = 2").is_err());
    }
}
