//! Device registry and state cache.
//!
//! The config file declares locations and devices; each device names the
//! protocol(s) it speaks and the identity option values that tie decoded
//! events to it. This module keeps the live state for those devices, turns
//! decoded events into config patches for GUI clients, answers `request
//! config`, and lowers controller send requests through the option schema.

use crate::registry::{ArgType, ConfType, ProtocolRegistry};
use crate::config::LocationConfig;
use rf_protocol::BroadcastMessage;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("the location \"{0}\" does not exist")]
    UnknownLocation(String),
    #[error("the device \"{0}\" does not exist")]
    UnknownDevice(String),
}

#[derive(Debug, Clone)]
struct Device {
    id: String,
    name: String,
    protocols: Vec<String>,
    ids: Map<String, Value>,
    settings: Map<String, Value>,
    state: Option<String>,
    values: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct Location {
    id: String,
    name: String,
    devices: Vec<Device>,
}

pub struct DeviceRegistry {
    registry: Arc<ProtocolRegistry>,
    locations: RwLock<Vec<Location>>,
}

impl DeviceRegistry {
    pub fn from_settings(registry: Arc<ProtocolRegistry>, locations: &[LocationConfig]) -> Self {
        let locations = locations
            .iter()
            .map(|loc| Location {
                id: loc.id.clone(),
                name: loc.name.clone(),
                devices: loc
                    .devices
                    .iter()
                    .map(|dev| Device {
                        id: dev.id.clone(),
                        name: dev.name.clone(),
                        protocols: dev.protocol.clone(),
                        ids: dev.ids.clone(),
                        settings: dev.settings.clone(),
                        state: dev.state.clone(),
                        values: Map::new(),
                    })
                    .collect(),
            })
            .collect();
        DeviceRegistry {
            registry,
            locations: RwLock::new(locations),
        }
    }

    // -----------------------------------------------------------------------
    // request config
    // -----------------------------------------------------------------------

    /// The full `{"config": {...}}` object sent to controllers, GUIs, and
    /// nodes.
    pub async fn config_broadcast(&self) -> Value {
        let locations = self.locations.read().await;
        let mut config = Map::new();
        for loc in locations.iter() {
            let mut entry = Map::new();
            entry.insert("name".into(), Value::String(loc.name.clone()));
            for dev in &loc.devices {
                let mut body = Map::new();
                body.insert("name".into(), Value::String(dev.name.clone()));
                body.insert(
                    "protocol".into(),
                    Value::Array(dev.protocols.iter().cloned().map(Value::String).collect()),
                );
                if !dev.ids.is_empty() {
                    body.insert("id".into(), Value::Object(dev.ids.clone()));
                }
                if let Some(state) = &dev.state {
                    body.insert("state".into(), Value::String(state.clone()));
                }
                for (k, v) in &dev.values {
                    body.insert(k.clone(), v.clone());
                }
                for (k, v) in &dev.settings {
                    body.insert(k.clone(), v.clone());
                }
                entry.insert(dev.id.clone(), Value::Object(body));
            }
            config.insert(loc.id.clone(), Value::Object(entry));
        }
        json!({ "config": Value::Object(config) })
    }

    /// Replace the registry from an upstream `{"config": {...}}` payload
    /// (node mode).
    pub async fn apply_remote(&self, payload: &Value) {
        let Some(config) = payload.get("config").and_then(Value::as_object) else {
            return;
        };
        let mut locations = Vec::new();
        for (loc_id, loc_body) in config {
            let Some(loc_body) = loc_body.as_object() else {
                continue;
            };
            let name = loc_body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(loc_id)
                .to_string();
            let mut devices = Vec::new();
            for (dev_id, dev_body) in loc_body {
                let Some(dev_body) = dev_body.as_object() else {
                    continue;
                };
                let Some(protocols) = dev_body.get("protocol").and_then(Value::as_array) else {
                    continue;
                };
                devices.push(Device {
                    id: dev_id.clone(),
                    name: dev_body
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(dev_id)
                        .to_string(),
                    protocols: protocols
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect(),
                    ids: dev_body
                        .get("id")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                    settings: Map::new(),
                    state: dev_body
                        .get("state")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    values: Map::new(),
                });
            }
            locations.push(Location {
                id: loc_id.clone(),
                name,
                devices,
            });
        }
        debug!(locations = locations.len(), "remote config applied");
        *self.locations.write().await = locations;
    }

    // -----------------------------------------------------------------------
    // ConfigUpdater
    // -----------------------------------------------------------------------

    /// Apply a decoded event to matching devices. Returns the update patch
    /// for GUI clients when at least one device matched.
    pub async fn update(&self, protocol: &str, msg: &BroadcastMessage) -> Option<Value> {
        let payload = msg.message.as_ref()?.as_object()?;
        let proto = self.registry.get(protocol)?;
        let desc = proto.descriptor();

        let mut matched = Vec::new();
        let mut new_values = Map::new();
        let mut locations = self.locations.write().await;
        for loc in locations.iter_mut() {
            for dev in &mut loc.devices {
                if !dev.protocols.iter().any(|p| p == protocol) {
                    continue;
                }
                let ids_match = desc.options_of(ConfType::Id).all(|opt| {
                    match (dev.ids.get(opt.name), payload.get(opt.name)) {
                        (Some(want), Some(got)) => values_equal(want, got),
                        (Some(_), None) => false,
                        (None, _) => true,
                    }
                });
                if !ids_match || dev.ids.is_empty() {
                    continue;
                }

                for opt in desc
                    .options
                    .iter()
                    .filter(|o| matches!(o.conftype, ConfType::Value | ConfType::Optional))
                {
                    if let Some(value) = payload.get(opt.name) {
                        dev.values.insert(opt.name.to_string(), value.clone());
                        new_values.insert(opt.name.to_string(), value.clone());
                    }
                }
                for opt in desc.options_of(ConfType::State) {
                    match opt.argtype {
                        ArgType::NoValue => {
                            if payload.contains_key(opt.name) {
                                dev.state = Some(opt.name.to_string());
                                new_values
                                    .insert("state".into(), Value::String(opt.name.to_string()));
                            }
                        }
                        ArgType::HasValue => {
                            if let Some(state) = payload.get("state").and_then(Value::as_str) {
                                dev.state = Some(state.to_string());
                                new_values.insert("state".into(), Value::String(state.into()));
                            }
                        }
                    }
                }
                // Decoded state fields also arrive as plain members
                // ({"state":"on"}); honor them when the schema has states.
                if desc.options_of(ConfType::State).next().is_some() {
                    if let Some(state) = payload.get("state").and_then(Value::as_str) {
                        dev.state = Some(state.to_string());
                        new_values.insert("state".into(), Value::String(state.into()));
                    }
                }
                matched.push(dev.id.clone());
            }
        }
        if matched.is_empty() {
            return None;
        }
        Some(json!({
            "origin": "update",
            "type": desc.devtype as u8,
            "devices": matched,
            "values": Value::Object(new_values),
        }))
    }

    // -----------------------------------------------------------------------
    // Controller send lowering
    // -----------------------------------------------------------------------

    /// Build the `{"message":"send","code":{...}}` frame for a controller
    /// request: identity and settings come from the device entry, overrides
    /// from `values`, and the requested state is lowered through the
    /// protocol's state options.
    pub async fn control_frame(
        &self,
        location: &str,
        device: &str,
        state: &str,
        values: &Map<String, Value>,
    ) -> Result<Value, DeviceError> {
        let locations = self.locations.read().await;
        let loc = locations
            .iter()
            .find(|l| l.id == location)
            .ok_or_else(|| DeviceError::UnknownLocation(location.to_string()))?;
        let dev = loc
            .devices
            .iter()
            .find(|d| d.id == device)
            .ok_or_else(|| DeviceError::UnknownDevice(device.to_string()))?;

        let mut code = Map::new();
        for name in &dev.protocols {
            let Some(proto) = self.registry.find_by_device(name) else {
                continue;
            };
            let desc = proto.descriptor();
            for opt in desc.options_of(ConfType::Id) {
                if let Some(v) = dev.ids.get(opt.name) {
                    code.entry(opt.name.to_string()).or_insert_with(|| v.clone());
                }
            }
            for opt in desc.options_of(ConfType::Setting) {
                if let Some(v) = dev.settings.get(opt.name) {
                    code.entry(opt.name.to_string()).or_insert_with(|| v.clone());
                }
            }
            for (key, value) in values {
                let allowed = desc.option(key).is_some_and(|o| {
                    matches!(o.conftype, ConfType::Value | ConfType::Optional) && o.validates(value)
                });
                if allowed {
                    code.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            for opt in desc.options_of(ConfType::State) {
                if code.contains_key(opt.name) {
                    continue;
                }
                match opt.argtype {
                    ArgType::NoValue if opt.name == state => {
                        code.insert(opt.name.to_string(), Value::from(1));
                        break;
                    }
                    ArgType::HasValue => {
                        code.insert(opt.name.to_string(), Value::String(state.to_string()));
                        break;
                    }
                    ArgType::NoValue => {}
                }
            }
        }
        code.insert(
            "protocol".into(),
            Value::Array(dev.protocols.iter().cloned().map(Value::String).collect()),
        );
        Ok(json!({ "message": "send", "code": Value::Object(code) }))
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}
