//! TCP control plane: accept loop, handshake, and frame routing.
//!
//! Every accepted session starts unclassified. The first useful frame is a
//! `{"message":"client <role>"}` handshake; everything a session may do
//! afterwards depends on its role. Node sessions can prefix a frame with an
//! `{"incognito":"<role>"}` hint to have the next frame handled as that
//! role; the override travels with the frame and the session's stored role
//! never changes.
//!
//! Send frames from sender/controller/GUI sessions are mirrored to every
//! node session (and, in node mode, upstream) so the whole federation sees
//! the same intent.

use crate::clients::{spawn_writer, ClientId, Clients};
use crate::devices::DeviceRegistry;
use crate::queue::{BroadcastTx, QueueTx};
use crate::registry::ProtocolRegistry;
use crate::sender::{queue_send, SendTask};
use rf_protocol::{
    accept_reply, incognito_hint, reject_reply, BroadcastMessage, ClientRole, Frame, BEAT,
};
use serde_json::{Map, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// One static page for browsers poking the control port; the real web UI is
/// served elsewhere.
const HTTP_CATCH_ALL: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><head><title>rfbridge</title></head><body><center><p>This is the rfbridge control port. The web interface is served by the configured webserver.</p></center></body></html>";

/// Shared routing context, used by local sessions and by the upstream link
/// for frames it multiplexes in.
pub struct ServerContext {
    pub clients: Clients,
    pub devices: Arc<DeviceRegistry>,
    pub registry: Arc<ProtocolRegistry>,
    pub send_q: QueueTx<SendTask>,
    pub broadcast: BroadcastTx,
    pub send_repeats: u32,
    pub uuid: String,
    /// Node mode: frames from local senders/controllers are mirrored here.
    pub uplink: Option<mpsc::UnboundedSender<String>>,
}

enum FrameOutcome {
    Continue,
    Close,
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

pub struct ClientSessionManager {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl ClientSessionManager {
    pub async fn bind(ctx: Arc<ServerContext>, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(ClientSessionManager { ctx, listener })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .expect("local_addr always succeeds after bind")
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let mut accept_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                changed = accept_shutdown.changed() => {
                    if changed.is_err() || *accept_shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        break;
                    }
                    Ok((stream, peer)) => {
                        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
                        debug!(id, %peer, "client connected");
                        tokio::spawn(run_session(
                            Arc::clone(&self.ctx),
                            id,
                            stream,
                            shutdown.clone(),
                        ));
                    }
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-session loop
// ---------------------------------------------------------------------------

async fn run_session(
    ctx: Arc<ServerContext>,
    id: ClientId,
    stream: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.clients.insert(id, tx).await;
    let writer = spawn_writer(write_half, rx);

    let mut lines = BufReader::new(read_half).lines();
    let mut override_role: Option<ClientRole> = None;

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            },
        };
        if line.is_empty() {
            continue;
        }
        match Frame::classify(&line) {
            Frame::Heart => ctx.clients.send_to(id, BEAT).await,
            Frame::Http => {
                debug!(id, "client recognized as web");
                ctx.clients.send_to(id, HTTP_CATCH_ALL).await;
                break;
            }
            Frame::Json(json) => {
                match handle_json(&ctx, id, &json, &mut override_role).await {
                    FrameOutcome::Continue => {}
                    FrameOutcome::Close => break,
                }
            }
            Frame::Invalid => {
                warn!(id, "malformed frame");
                ctx.clients.send_to(id, reject_reply()).await;
                break;
            }
        }
    }

    if let Some(handle) = ctx.clients.remove(id).await {
        if let Some(role) = handle.role {
            debug!(id, %role, uuid = ?handle.uuid, "client disconnected");
        }
    }
    drop(writer);
}

// ---------------------------------------------------------------------------
// Frame routing
// ---------------------------------------------------------------------------

async fn handle_json(
    ctx: &Arc<ServerContext>,
    id: ClientId,
    json: &Value,
    override_role: &mut Option<ClientRole>,
) -> FrameOutcome {
    // A role hint applies to the next frame only.
    if let Some(name) = json.get("incognito").and_then(Value::as_str) {
        match ClientRole::from_wire(name) {
            Some(role) => *override_role = Some(role),
            None => warn!(id, incognito = name, "unknown incognito role"),
        }
        return FrameOutcome::Continue;
    }

    let session_role = ctx.clients.role(id).await;
    let effective = override_role.take().or(session_role);

    if let Some(message) = json.get("message").and_then(Value::as_str) {
        mirror_upstream(ctx, effective, message, json);
        return match effective {
            None => handshake(ctx, id, json, message).await,
            Some(ClientRole::Node) => node_message(ctx, id, json, message).await,
            Some(ClientRole::Sender) => {
                queue_send(json, &ctx.registry, &ctx.uuid, ctx.send_repeats, &ctx.send_q);
                if message == "send" {
                    cascade_to_nodes(ctx, ClientRole::Sender, json).await;
                }
                // Fire-and-forget: real sender sessions close immediately.
                if session_role == Some(ClientRole::Sender) {
                    FrameOutcome::Close
                } else {
                    FrameOutcome::Continue
                }
            }
            Some(ClientRole::Controller | ClientRole::Gui) => {
                let outcome = controller_message(ctx, id, session_role, json, message).await;
                if message == "send" {
                    cascade_to_nodes(ctx, ClientRole::Controller, json).await;
                }
                outcome
            }
            Some(ClientRole::Receiver | ClientRole::Web) => FrameOutcome::Continue,
        };
    }

    if json.get("origin").is_some() {
        external_event(ctx, json);
        return FrameOutcome::Continue;
    }

    if session_role.is_none() {
        ctx.clients.send_to(id, reject_reply()).await;
        return FrameOutcome::Close;
    }
    FrameOutcome::Continue
}

/// Node mode: everything a sender/controller/GUI session asks of this
/// daemon is also told to the upstream daemon, tagged with the originating
/// role.
fn mirror_upstream(
    ctx: &ServerContext,
    role: Option<ClientRole>,
    message: &str,
    json: &Value,
) {
    let Some(uplink) = &ctx.uplink else {
        return;
    };
    let Some(role) = role else {
        return;
    };
    if role == ClientRole::Node || role == ClientRole::Receiver || message == "request config" {
        return;
    }
    let _ = uplink.send(incognito_hint(role));
    let _ = uplink.send(json.to_string());
}

async fn cascade_to_nodes(ctx: &ServerContext, as_role: ClientRole, json: &Value) {
    let hint = incognito_hint(as_role);
    let frame = json.to_string();
    for node in ctx.clients.node_ids().await {
        ctx.clients.send_to(node, &hint).await;
        ctx.clients.send_to(node, &frame).await;
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

async fn handshake(
    ctx: &ServerContext,
    id: ClientId,
    json: &Value,
    message: &str,
) -> FrameOutcome {
    let Some(role) = ClientRole::from_handshake(message) else {
        ctx.clients.send_to(id, reject_reply()).await;
        return FrameOutcome::Close;
    };
    ctx.clients.send_to(id, accept_reply()).await;
    ctx.clients.set_role(id, role).await;
    info!(id, %role, "client recognized");

    if role == ClientRole::Node {
        match json.get("uuid").and_then(Value::as_str) {
            Some(uuid) => ctx.clients.set_uuid(id, uuid.to_string()).await,
            None => {
                // A node without an identity cannot join the federation.
                ctx.clients.clear_role(id).await;
                ctx.clients.send_to(id, reject_reply()).await;
                return FrameOutcome::Close;
            }
        }
    }
    FrameOutcome::Continue
}

// ---------------------------------------------------------------------------
// Role handlers
// ---------------------------------------------------------------------------

async fn node_message(
    ctx: &ServerContext,
    id: ClientId,
    json: &Value,
    message: &str,
) -> FrameOutcome {
    match message {
        "request config" => {
            let config = ctx.devices.config_broadcast().await;
            ctx.clients.send_to(id, &config.to_string()).await;
        }
        "update" => {
            // Reverse of the upstream wrapper: drop the marker, rename the
            // code payload back to message, re-enter the broadcast path.
            if json.get("protocol").and_then(Value::as_str).is_some() {
                let mut inner = json.clone();
                if let Some(obj) = inner.as_object_mut() {
                    obj.remove("message");
                    if let Some(code) = obj.remove("code") {
                        obj.insert("message".into(), code);
                    }
                }
                external_event(ctx, &inner);
            }
        }
        _ => {}
    }
    FrameOutcome::Continue
}

async fn controller_message(
    ctx: &ServerContext,
    id: ClientId,
    session_role: Option<ClientRole>,
    json: &Value,
    message: &str,
) -> FrameOutcome {
    match message {
        "request config" => {
            let config = ctx.devices.config_broadcast().await;
            ctx.clients.send_to(id, &config.to_string()).await;
            FrameOutcome::Continue
        }
        "send" => {
            control_send(ctx, json).await;
            // Plain controllers are fire-and-forget like senders; GUIs keep
            // their session.
            if session_role == Some(ClientRole::Controller) {
                FrameOutcome::Close
            } else {
                FrameOutcome::Continue
            }
        }
        "receiver" => {
            // An externally decoded event handed to us for rebroadcast,
            // under the protocol the frame itself declares.
            let mut inner = json.clone();
            if let Some(obj) = inner.as_object_mut() {
                obj.remove("message");
            }
            external_event(ctx, &inner);
            FrameOutcome::Continue
        }
        _ => FrameOutcome::Continue,
    }
}

pub(crate) async fn control_send(ctx: &ServerContext, json: &Value) {
    let Some(code) = json.get("code") else {
        error!("controller did not send any codes");
        return;
    };
    let Some(location) = code.get("location").and_then(Value::as_str) else {
        error!("controller did not send a location");
        return;
    };
    let Some(device) = code.get("device").and_then(Value::as_str) else {
        error!("controller did not send a device");
        return;
    };
    let state = code.get("state").and_then(Value::as_str).unwrap_or("");
    let values = code
        .get("values")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    match ctx.devices.control_frame(location, device, state, &values).await {
        Ok(frame) => queue_send(&frame, &ctx.registry, &ctx.uuid, ctx.send_repeats, &ctx.send_q),
        Err(e) => error!("{e}"),
    }
}

/// Re-enter the broadcast path with an externally-originated event frame.
pub fn external_event(ctx: &ServerContext, json: &Value) {
    match serde_json::from_value::<BroadcastMessage>(json.clone()) {
        Ok(msg) => {
            ctx.broadcast.push(msg);
        }
        Err(e) => debug!(error = %e, "unusable external event frame"),
    }
}
