//! Send path: request routing and the transmit worker.
//!
//! A send request names a device; the registry resolves it to a protocol
//! whose `create_code` produces the pulse train. The worker expands the
//! train with all repeats, takes the transmit lock for the full duration of
//! the radio write, and confirms with an origin-`sender` broadcast. Raw
//! trains additionally loop back into the receive queue (the self-test
//! path) whether or not a radio accepted them.

use crate::hardware::HardwareUnit;
use crate::queue::{BroadcastTx, QueueTx};
use crate::registry::{ConfType, Protocol, ProtocolRegistry};
use crate::transmit::TransmitLock;
use pulse_core::{HwType, PulseSegment, PULSE_DIV};
use rf_protocol::{BroadcastMessage, Origin};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// One encoded transmission waiting for the radio.
pub struct SendTask {
    pub protocol: Arc<dyn Protocol>,
    pub raw: Vec<u32>,
    pub message: Option<Value>,
    pub settings: Map<String, Value>,
    pub uuid: Option<String>,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Resolve a `{"message":"send","code":{...}}` frame and enqueue the
/// encoded transmission. Requests carrying a foreign uuid are ignored;
/// they are meant for another daemon in the federation.
pub fn queue_send(
    json: &Value,
    registry: &ProtocolRegistry,
    our_uuid: &str,
    send_repeats: u32,
    send_q: &QueueTx<SendTask>,
) {
    let Some(code) = json.get("code") else {
        error!("sender did not send any codes");
        return;
    };
    let Some(protocols) = code.get("protocol").and_then(Value::as_array) else {
        error!("sender did not provide a protocol name");
        return;
    };
    let uuid = code.get("uuid").and_then(Value::as_str);
    if let Some(uuid) = uuid {
        if uuid != our_uuid {
            return;
        }
    }
    if send_repeats == 0 {
        return;
    }
    let Some(protocol) = protocols
        .iter()
        .filter_map(Value::as_str)
        .find_map(|name| registry.find_by_device(name))
    else {
        error!("send request matched no registered protocol");
        return;
    };

    let encoded = match protocol.create_code(code) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(protocol = protocol.descriptor().id, error = %e, "could not encode send request");
            return;
        }
    };

    // Lift schema settings out of the code object into the confirmation.
    let mut settings = Map::new();
    for opt in protocol.descriptor().options_of(ConfType::Setting) {
        if let Some(value) = code.get(opt.name) {
            if opt.validates(value) {
                settings.insert(opt.name.to_string(), value.clone());
            }
        }
    }

    send_q.push(SendTask {
        protocol,
        raw: encoded.raw,
        message: encoded.message,
        settings,
        uuid: uuid.map(str::to_owned),
    });
}

// ---------------------------------------------------------------------------
// Transmit worker
// ---------------------------------------------------------------------------

pub struct Sender {
    hardware: Vec<HardwareUnit>,
    transmit: TransmitLock,
    send_repeats: u32,
    broadcast: BroadcastTx,
    receive_q: QueueTx<PulseSegment>,
}

impl Sender {
    pub fn new(
        hardware: Vec<HardwareUnit>,
        transmit: TransmitLock,
        send_repeats: u32,
        broadcast: BroadcastTx,
        receive_q: QueueTx<PulseSegment>,
    ) -> Self {
        Sender {
            hardware,
            transmit,
            send_repeats,
            broadcast,
            receive_q,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<SendTask>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                task = rx.recv() => match task {
                    None => break,
                    Some(task) => self.transmit_task(task).await,
                },
            }
        }
        for hw in &self.hardware {
            hw.deinit().await;
        }
    }

    pub async fn transmit_task(&self, task: SendTask) {
        let d = task.protocol.descriptor();
        let envelope = self.confirmation(&task);

        // One train with every repeat included, terminated by a zero pulse.
        let repeats = (self.send_repeats * d.txrpt) as usize;
        let mut long_code = Vec::with_capacity(task.raw.len() * repeats + 1);
        for _ in 0..repeats {
            long_code.extend_from_slice(&task.raw);
        }
        long_code.push(0);

        let radio = self
            .hardware
            .iter()
            .find(|hw| hw.has_send() && hw.kind() == d.hwtype);
        {
            let _guard = self.transmit.acquire().await;
            match radio {
                Some(radio) => match radio.send(&long_code).await {
                    Ok(()) => debug!(protocol = d.id, pulses = long_code.len(), "code sent"),
                    Err(e) => error!(protocol = d.id, error = %e, "failed to send code"),
                },
                None => debug!(protocol = d.id, hwtype = %d.hwtype, "no transmit hardware"),
            }
        }

        if d.id == "raw" {
            let plslen = task.raw.last().copied().unwrap_or(0) / PULSE_DIV;
            self.receive_q.push(PulseSegment {
                raw: task.raw.clone(),
                plslen,
                hwtype: HwType::Any,
            });
        }

        if let Some(envelope) = envelope {
            self.broadcast.push(envelope);
        }
    }

    /// The origin-`sender` confirmation, present when the encode produced a
    /// message or settings were lifted from the request.
    fn confirmation(&self, task: &SendTask) -> Option<BroadcastMessage> {
        let d = task.protocol.descriptor();
        let mut envelope: Option<BroadcastMessage> = None;
        if let Some(message) = &task.message {
            if message.as_object().is_some_and(|m| !m.is_empty()) {
                let mut e = BroadcastMessage::new(Origin::Sender, d.id, message.clone());
                e.uuid = task.uuid.clone();
                e.extra.insert("repeat".into(), Value::from(1));
                envelope = Some(e);
            }
        }
        if !task.settings.is_empty() {
            let e = envelope.get_or_insert_with(|| BroadcastMessage {
                origin: Origin::Sender,
                protocol: d.id.to_string(),
                message: None,
                uuid: task.uuid.clone(),
                repeats: None,
                settings: None,
                extra: Map::new(),
            });
            e.settings = Some(Value::Object(task.settings.clone()));
        }
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols;
    use crate::queue;
    use serde_json::json;

    fn send_frame(code: Value) -> Value {
        json!({"message": "send", "code": code})
    }

    #[test]
    fn routing_resolves_protocol_and_encodes() {
        let registry = protocols::register_all();
        let (tx, mut rx) = queue::bounded("send");
        queue_send(
            &send_frame(json!({"protocol": ["kaku_switch"], "id": 4, "unit": 1, "on": 1})),
            &registry,
            "uuid-1",
            10,
            &tx,
        );
        let task = rx.try_recv().expect("task queued");
        assert_eq!(task.protocol.descriptor().id, "kaku_switch");
        assert_eq!(task.raw.len(), 50);
        assert_eq!(
            task.message.unwrap(),
            json!({"id": 4, "unit": 1, "state": "on"})
        );
    }

    #[test]
    fn routing_ignores_foreign_uuid() {
        let registry = protocols::register_all();
        let (tx, mut rx) = queue::bounded("send");
        queue_send(
            &send_frame(json!({
                "protocol": ["kaku_switch"], "id": 4, "unit": 1, "on": 1,
                "uuid": "someone-else"
            })),
            &registry,
            "uuid-1",
            10,
            &tx,
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn routing_rejects_unknown_device() {
        let registry = protocols::register_all();
        let (tx, mut rx) = queue::bounded("send");
        queue_send(
            &send_frame(json!({"protocol": ["mystery"], "id": 1})),
            &registry,
            "uuid-1",
            10,
            &tx,
        );
        assert!(rx.try_recv().is_err());
    }
}
