//! Upstream link (node mode).
//!
//! When a master daemon is configured, this daemon joins it as a node:
//!
//! 1. WELCOME: send `{"message":"client node","uuid":...}`
//! 2. IDENTIFY: wait for `accept client`
//! 3. REQUEST/CONFIG: ask for the master's config and feed it to the
//!    device registry
//! 4. FORWARD: multiplex; inbound `incognito` hints set the virtual role
//!    for subsequent lines, which are routed through the same handlers as
//!    local sessions; untagged event lines re-enter the broadcast path.
//!    Outbound, every local event is written upstream as an update.
//!
//! A lost connection backs off one second and starts over. Being rejected
//! by the master is fatal for the whole daemon.

use crate::server::{control_send, external_event, ServerContext};
use crate::sender::queue_send;
use rf_protocol::{ClientRole, Frame};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Identify,
    Config,
    Forward,
}

enum SessionEnd {
    Lost,
    Fatal,
    Shutdown,
}

pub struct UpstreamLink {
    host: String,
    port: u16,
    ctx: Arc<ServerContext>,
    /// Lines produced by the broadcaster and local mirrors.
    outbound: mpsc::UnboundedReceiver<String>,
    /// Being rejected upstream stops the daemon.
    shutdown_trigger: Arc<watch::Sender<bool>>,
}

impl UpstreamLink {
    pub fn new(
        host: String,
        port: u16,
        ctx: Arc<ServerContext>,
        outbound: mpsc::UnboundedReceiver<String>,
        shutdown_trigger: Arc<watch::Sender<bool>>,
    ) -> Self {
        UpstreamLink {
            host,
            port,
            ctx,
            outbound,
            shutdown_trigger,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let stream = tokio::select! {
                _ = shutdown.changed() => break,
                connected = TcpStream::connect((self.host.as_str(), self.port)) => match connected {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(host = %self.host, port = self.port, error = %e, "could not connect to master daemon");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            match self.drive_session(stream, &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Fatal => {
                    error!("rejected by master daemon");
                    let _ = self.shutdown_trigger.send(true);
                    break;
                }
                SessionEnd::Lost => {
                    warn!("connection to master daemon lost, trying to reconnect");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn drive_session(
        &mut self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let welcome = format!(
            "{{\"message\":\"client node\",\"uuid\":\"{}\"}}\n",
            self.ctx.uuid
        );
        if write_half.write_all(welcome.as_bytes()).await.is_err() {
            return SessionEnd::Lost;
        }

        let mut step = Step::Identify;
        let mut virtual_role: Option<ClientRole> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return SessionEnd::Shutdown;
                    }
                }
                outbound = self.outbound.recv(), if step == Step::Forward => {
                    let Some(line) = outbound else { return SessionEnd::Shutdown };
                    let framed = format!("{line}\n");
                    if write_half.write_all(framed.as_bytes()).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) | Err(_) => return SessionEnd::Lost,
                    };
                    if line.is_empty() {
                        continue;
                    }
                    let Frame::Json(json) = Frame::classify(&line) else {
                        continue;
                    };
                    match step {
                        Step::Identify => {
                            match json.get("message").and_then(Value::as_str) {
                                Some("accept client") => {
                                    info!("master daemon accepted us as node");
                                    if write_half
                                        .write_all(b"{\"message\":\"request config\"}\n")
                                        .await
                                        .is_err()
                                    {
                                        return SessionEnd::Lost;
                                    }
                                    step = Step::Config;
                                }
                                Some("reject client") => return SessionEnd::Fatal,
                                _ => {}
                            }
                        }
                        Step::Config => {
                            if json.get("config").is_some() {
                                self.ctx.devices.apply_remote(&json).await;
                                debug!("master config applied");
                                step = Step::Forward;
                            }
                        }
                        Step::Forward => {
                            self.forward_frame(&json, &mut virtual_role).await;
                        }
                    }
                }
            }
        }
    }

    async fn forward_frame(&self, json: &Value, virtual_role: &mut Option<ClientRole>) {
        if let Some(name) = json.get("incognito").and_then(Value::as_str) {
            match ClientRole::from_wire(name) {
                Some(role) => *virtual_role = Some(role),
                None => warn!(incognito = name, "unknown incognito role from master"),
            }
            return;
        }
        if json.get("config").is_some() {
            return;
        }
        match *virtual_role {
            Some(ClientRole::Sender) => {
                queue_send(
                    json,
                    &self.ctx.registry,
                    &self.ctx.uuid,
                    self.ctx.send_repeats,
                    &self.ctx.send_q,
                );
            }
            Some(ClientRole::Controller | ClientRole::Gui) => {
                match json.get("message").and_then(Value::as_str) {
                    Some("send") => control_send(&self.ctx, json).await,
                    Some("receiver") => {
                        let mut inner = json.clone();
                        if let Some(obj) = inner.as_object_mut() {
                            obj.remove("message");
                        }
                        external_event(&self.ctx, &inner);
                    }
                    _ => {}
                }
            }
            _ => {
                // Untagged event lines from the master re-enter broadcast.
                if json.get("origin").is_some() && json.get("protocol").is_some() {
                    external_event(&self.ctx, json);
                }
            }
        }
    }
}
