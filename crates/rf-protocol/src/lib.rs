// rf-protocol: control-plane message types and serialization.
//
// The TCP control plane speaks newline-delimited JSON objects plus the bare
// HEART/BEAT liveness pair. This crate owns the frozen wire vocabulary
// (roles, origins, the broadcast envelope) and the pure transforms applied
// to it on fan-out, so the daemon's workers never hand-assemble JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

mod frame;
mod transform;

pub use frame::Frame;
pub use transform::{is_skippable_payload, node_update_form, receiver_form};

/// Liveness probe and its reply, exchanged as bare (non-JSON) lines.
pub const HEART: &str = "HEART";
pub const BEAT: &str = "BEAT";

// ---------------------------------------------------------------------------
// ClientRole
// ---------------------------------------------------------------------------

/// The negotiated identity of a client session.
///
/// Wire names are the lowercase variant names; a session announces itself
/// with a `{"message":"client <role>"}` handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Receiver,
    Sender,
    Controller,
    Node,
    Gui,
    Web,
}

impl ClientRole {
    pub const ALL: [ClientRole; 6] = [
        ClientRole::Receiver,
        ClientRole::Sender,
        ClientRole::Controller,
        ClientRole::Node,
        ClientRole::Gui,
        ClientRole::Web,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClientRole::Receiver => "receiver",
            ClientRole::Sender => "sender",
            ClientRole::Controller => "controller",
            ClientRole::Node => "node",
            ClientRole::Gui => "gui",
            ClientRole::Web => "web",
        }
    }

    pub fn from_wire(name: &str) -> Option<ClientRole> {
        ClientRole::ALL.iter().copied().find(|r| r.as_str() == name)
    }

    /// Parse the handshake message body (`"client <role>"`).
    pub fn from_handshake(message: &str) -> Option<ClientRole> {
        let role = message.strip_prefix("client ")?;
        ClientRole::from_wire(role)
    }

    /// Roles that receive event broadcasts (the "receivers" population).
    pub fn is_broadcast_target(self) -> bool {
        matches!(self, ClientRole::Receiver | ClientRole::Gui | ClientRole::Node)
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Where a broadcast message was born; drives fan-out behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Receiver,
    Sender,
    Config,
    Update,
}

// ---------------------------------------------------------------------------
// BroadcastMessage
// ---------------------------------------------------------------------------

/// The structured envelope flowing through the broadcast queue.
///
/// `message` holds the protocol-specific payload; it is renamed to `code`
/// when the envelope leaves the daemon toward receiver sessions. Unknown
/// members (for example `repeat` on sender confirmations) ride along in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub origin: Origin,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl BroadcastMessage {
    pub fn new(origin: Origin, protocol: impl Into<String>, message: Value) -> Self {
        BroadcastMessage {
            origin,
            protocol: protocol.into(),
            message: Some(message),
            uuid: None,
            repeats: None,
            settings: None,
            extra: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake replies
// ---------------------------------------------------------------------------

pub fn accept_reply() -> &'static str {
    r#"{"message":"accept client"}"#
}

pub fn reject_reply() -> &'static str {
    r#"{"message":"reject client"}"#
}

/// The per-frame role hint prefixed to frames mirrored toward node sessions
/// and to frames multiplexed over the upstream link.
pub fn incognito_hint(role: ClientRole) -> String {
    format!(r#"{{"incognito":"{}"}}"#, role.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_parses_known_roles_only() {
        assert_eq!(ClientRole::from_handshake("client gui"), Some(ClientRole::Gui));
        assert_eq!(ClientRole::from_handshake("client node"), Some(ClientRole::Node));
        assert_eq!(ClientRole::from_handshake("client spy"), None);
        assert_eq!(ClientRole::from_handshake("gui"), None);
    }

    #[test]
    fn broadcast_targets_are_receiver_gui_node() {
        let targets: Vec<_> = ClientRole::ALL
            .iter()
            .copied()
            .filter(|r| r.is_broadcast_target())
            .collect();
        assert_eq!(
            targets,
            vec![ClientRole::Receiver, ClientRole::Node, ClientRole::Gui]
        );
    }

    #[test]
    fn envelope_skips_absent_optionals() {
        let msg = BroadcastMessage::new(Origin::Receiver, "kaku_switch", json!({"id": 1}));
        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            out,
            json!({"origin": "receiver", "protocol": "kaku_switch", "message": {"id": 1}})
        );
    }

    #[test]
    fn envelope_round_trips_unknown_members() {
        let wire = json!({
            "origin": "sender",
            "protocol": "kaku_switch",
            "message": {"id": 1, "on": 1},
            "repeat": 1
        });
        let msg: BroadcastMessage = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(msg.extra.get("repeat"), Some(&json!(1)));
        assert_eq!(serde_json::to_value(&msg).unwrap(), wire);
    }

    #[test]
    fn incognito_hint_shape() {
        assert_eq!(
            incognito_hint(ClientRole::Sender),
            r#"{"incognito":"sender"}"#
        );
    }
}
