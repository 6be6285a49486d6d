//! Broadcast fan-out.
//!
//! Config-origin envelopes go verbatim to GUI sessions. Everything else
//! first feeds the device state cache (whose patches also go to GUIs), then
//! fans out in receiver form to receiver sessions, and, when the daemon
//! runs as a node, is forwarded upstream wrapped as an update. Firmware
//! telemetry additionally refreshes the process-wide firmware record before
//! fan-out.

use crate::clients::Clients;
use crate::devices::DeviceRegistry;
use crate::registry::FIRMWARE_PROTOCOL;
use rf_protocol::{node_update_form, receiver_form, BroadcastMessage, ClientRole, Origin};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

/// Last firmware report from the attached transceiver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub version: i64,
    pub lpf: i64,
    pub hpf: i64,
}

pub type SharedFirmware = Arc<Mutex<FirmwareInfo>>;

pub struct Broadcaster {
    clients: Clients,
    devices: Arc<DeviceRegistry>,
    firmware: SharedFirmware,
    /// Present in node mode: lines written here reach the upstream daemon.
    uplink: Option<mpsc::UnboundedSender<String>>,
}

impl Broadcaster {
    pub fn new(
        clients: Clients,
        devices: Arc<DeviceRegistry>,
        firmware: SharedFirmware,
        uplink: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        Broadcaster {
            clients,
            devices,
            firmware,
            uplink,
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<BroadcastMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = rx.recv() => match msg {
                    None => break,
                    Some(msg) => self.dispatch(msg).await,
                },
            }
        }
    }

    pub async fn dispatch(&self, msg: BroadcastMessage) {
        if msg.origin == Origin::Config {
            match serde_json::to_string(&msg) {
                Ok(line) => {
                    let written = self.clients.send_to_role(ClientRole::Gui, &line).await;
                    if written > 0 {
                        debug!(protocol = %msg.protocol, written, "config broadcast");
                    }
                }
                Err(e) => warn!(error = %e, "unserializable config broadcast"),
            }
            return;
        }

        if let Some(patch) = self.devices.update(&msg.protocol, &msg).await {
            self.clients
                .send_to_role(ClientRole::Gui, &patch.to_string())
                .await;
        }

        if msg.protocol == FIRMWARE_PROTOCOL {
            self.record_firmware(&msg).await;
        }

        if self.clients.receiver_count().await > 0 {
            if let Some(outward) = receiver_form(&msg) {
                let written = self
                    .clients
                    .send_to_role(ClientRole::Receiver, &outward.to_string())
                    .await;
                if written > 0 {
                    debug!(protocol = %msg.protocol, written, "event broadcast");
                }
            }
        }

        if let Some(uplink) = &self.uplink {
            let _ = uplink.send(node_update_form(&msg).to_string());
        }
    }

    async fn record_firmware(&self, msg: &BroadcastMessage) {
        let Some(payload) = msg.message.as_ref().and_then(|m| m.as_object()) else {
            return;
        };
        let field = |name: &str| payload.get(name).and_then(serde_json::Value::as_i64);
        let (Some(version), Some(lpf), Some(hpf)) = (field("version"), field("lpf"), field("hpf"))
        else {
            return;
        };
        let mut fw = self.firmware.lock().await;
        *fw = FirmwareInfo { version, lpf, hpf };
        debug!(version, lpf, hpf, "firmware record updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceRegistry;
    use crate::protocols;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn broadcaster(uplink: Option<mpsc::UnboundedSender<String>>) -> (Broadcaster, Clients, SharedFirmware) {
        let clients = Clients::new();
        let registry = Arc::new(protocols::register_all());
        let devices = Arc::new(DeviceRegistry::from_settings(registry, &[]));
        let firmware = SharedFirmware::default();
        (
            Broadcaster::new(clients.clone(), devices, firmware.clone(), uplink),
            clients,
            firmware,
        )
    }

    #[tokio::test]
    async fn config_origin_reaches_gui_only() {
        let (bc, clients, _) = broadcaster(None);
        let (gui_tx, mut gui_rx) = unbounded_channel();
        let (rec_tx, mut rec_rx) = unbounded_channel();
        clients.insert(1, gui_tx).await;
        clients.insert(2, rec_tx).await;
        clients.set_role(1, ClientRole::Gui).await;
        clients.set_role(2, ClientRole::Receiver).await;

        bc.dispatch(BroadcastMessage::new(
            Origin::Config,
            "process",
            json!({"cpu": 1.5, "ram": 2.5}),
        ))
        .await;

        let line = gui_rx.try_recv().expect("gui gets config broadcasts");
        assert!(line.contains("\"origin\":\"config\""));
        assert!(rec_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_reaches_receivers_in_outward_form() {
        let (bc, clients, _) = broadcaster(None);
        let (rec_tx, mut rec_rx) = unbounded_channel();
        clients.insert(1, rec_tx).await;
        clients.set_role(1, ClientRole::Receiver).await;

        let mut msg = BroadcastMessage::new(
            Origin::Receiver,
            "kaku_switch",
            json!({"id": 4, "unit": 1, "state": "on"}),
        );
        msg.settings = Some(json!({"secret": 1}));
        bc.dispatch(msg).await;

        let line = rec_rx.try_recv().expect("receiver gets the event");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["code"], json!({"id": 4, "unit": 1, "state": "on"}));
        assert!(value.get("message").is_none());
        assert!(value.get("settings").is_none());
    }

    #[tokio::test]
    async fn node_mode_forwards_update_upstream() {
        let (tx, mut rx) = unbounded_channel();
        let (bc, _clients, _) = broadcaster(Some(tx));
        bc.dispatch(BroadcastMessage::new(
            Origin::Receiver,
            "kaku_switch",
            json!({"id": 4, "unit": 1, "state": "on"}),
        ))
        .await;
        let line = rx.try_recv().expect("upstream line");
        assert!(line.contains("\"message\":\"update\""));
        assert!(line.contains("\"code\""));
    }

    #[tokio::test]
    async fn firmware_broadcast_updates_record() {
        let (bc, _clients, firmware) = broadcaster(None);
        bc.dispatch(BroadcastMessage::new(
            Origin::Receiver,
            "firmware",
            json!({"version": 3, "lpf": 2, "hpf": 1}),
        ))
        .await;
        assert_eq!(
            *firmware.lock().await,
            FirmwareInfo {
                version: 3,
                lpf: 2,
                hpf: 1
            }
        );
    }
}
