//! rfbridged: bridges 433 MHz RF devices to a TCP/JSON control plane.
//!
//! The pipeline has four asynchronous stages (hardware capture,
//! receive-decode, broadcast/send, hardware transmit) decoupled by bounded
//! queues and serialized on the radio by a single transmit lock. Client
//! sessions attach over TCP with newline-delimited JSON; in node mode the
//! daemon additionally joins an upstream master daemon and the two exchange
//! events and send intents.
//!
//! [`spawn_daemon`] wires everything up from a [`config::Settings`] value
//! and returns a handle the binary (and the integration tests) drive.

pub mod broadcaster;
pub mod capture;
pub mod clients;
pub mod config;
pub mod decoder;
pub mod devices;
pub mod hardware;
pub mod monitor;
pub mod pidfile;
pub mod protocols;
pub mod queue;
pub mod registry;
pub mod sender;
pub mod server;
pub mod transmit;
pub mod uplink;

use crate::broadcaster::{Broadcaster, SharedFirmware};
use crate::capture::CaptureLoop;
use crate::clients::Clients;
use crate::config::{HardwareSettings, Settings};
use crate::decoder::ReceiveDecoder;
use crate::devices::DeviceRegistry;
use crate::hardware::{Hardware, HardwareUnit, Loopback, LoopbackHandle, Serial433};
use crate::queue::BroadcastTx;
use crate::sender::Sender;
use crate::server::{ClientSessionManager, ServerContext};
use crate::transmit::TransmitLock;
use crate::uplink::UpstreamLink;
use pulse_core::HwType;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("could not bind control socket: {0}")]
    Bind(std::io::Error),
    #[error("could not initialize hardware: {0}")]
    Hardware(#[from] hardware::HardwareError),
}

/// A running daemon. Dropping the handle does not stop it; call
/// [`DaemonHandle::shutdown`].
pub struct DaemonHandle {
    /// Bound control-plane address; `None` in node mode.
    pub addr: Option<SocketAddr>,
    pub uuid: String,
    /// Simulation side of every configured loopback driver, in config
    /// order.
    pub loopbacks: Vec<LoopbackHandle>,
    pub firmware: SharedFirmware,
    pub broadcast: BroadcastTx,
    shutdown: Arc<watch::Sender<bool>>,
}

impl DaemonHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_trigger(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown)
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Build the registry, hardware, queues, and workers, then start them.
pub async fn spawn_daemon(settings: Settings) -> Result<DaemonHandle, StartupError> {
    let uuid = uuid::Uuid::new_v4().to_string();
    let registry = Arc::new(protocols::register_all());
    let devices = Arc::new(DeviceRegistry::from_settings(
        Arc::clone(&registry),
        &settings.locations,
    ));

    // Hardware units; serial drivers must open their device now.
    let mut units = Vec::new();
    let mut loopbacks = Vec::new();
    for hw in &settings.hardware {
        let unit = match hw {
            HardwareSettings::Serial433 { device } => {
                let unit = HardwareUnit::new(
                    HwType::Rf433,
                    Hardware::Serial433(Serial433::new(device.clone())),
                );
                unit.init().await?;
                unit
            }
            HardwareSettings::Loopback { hwtype } => {
                let (hw, handle) = Loopback::pair(true);
                loopbacks.push(handle);
                HardwareUnit::new(*hwtype, Hardware::Loopback(hw))
            }
            HardwareSettings::None => HardwareUnit::new(HwType::Api, Hardware::NoRadio),
        };
        units.push(unit);
    }

    let (receive_tx, receive_rx) = queue::bounded("receiver");
    let (send_tx, send_rx) = queue::bounded("send");
    let (broadcast_raw_tx, broadcast_rx) = queue::bounded("broadcast");
    let broadcast = BroadcastTx::new(broadcast_raw_tx, uuid.clone());

    let transmit = TransmitLock::new();
    let clients = Clients::new();
    let firmware = SharedFirmware::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);

    // Node mode: a configured, reachable master turns this daemon into a
    // client of the federation instead of its authority.
    let node_mode = match (&settings.master, settings.server.standalone) {
        (Some(master), false) => {
            let probe = tokio::time::timeout(
                Duration::from_secs(2),
                TcpStream::connect((master.host.as_str(), master.port)),
            )
            .await;
            match probe {
                Ok(Ok(_)) => {
                    info!(host = %master.host, port = master.port, "a master daemon was found, joining as node");
                    true
                }
                _ => {
                    info!("no master daemon found, serving");
                    false
                }
            }
        }
        _ => false,
    };

    let (uplink_tx, uplink_rx) = if node_mode {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let ctx = Arc::new(ServerContext {
        clients: clients.clone(),
        devices: Arc::clone(&devices),
        registry: Arc::clone(&registry),
        send_q: send_tx,
        broadcast: broadcast.clone(),
        send_repeats: settings.pipeline.send_repeats,
        uuid: uuid.clone(),
        uplink: uplink_tx,
    });

    // Capture loop per receiving driver.
    let bounds = registry.rawlen_bounds();
    for unit in units.iter().filter(|u| u.has_receive()).cloned() {
        let capture = CaptureLoop::new(unit, bounds, transmit.clone(), receive_tx.clone());
        tokio::spawn(capture.run(shutdown_rx.clone()));
    }

    let decoder = ReceiveDecoder::new(
        Arc::clone(&registry),
        broadcast.clone(),
        settings.pipeline.receive_repeats,
    );
    tokio::spawn(decoder.run(receive_rx, shutdown_rx.clone()));

    let sender = Sender::new(
        units,
        transmit,
        settings.pipeline.send_repeats,
        broadcast.clone(),
        receive_tx,
    );
    tokio::spawn(sender.run(send_rx, shutdown_rx.clone()));

    let bc = Broadcaster::new(
        clients,
        Arc::clone(&devices),
        firmware.clone(),
        ctx.uplink.clone(),
    );
    tokio::spawn(bc.run(broadcast_rx, shutdown_rx.clone()));

    let addr = if node_mode {
        let master = settings.master.as_ref().expect("node mode implies master");
        let link = UpstreamLink::new(
            master.host.clone(),
            master.port,
            Arc::clone(&ctx),
            uplink_rx.expect("node mode implies uplink channel"),
            Arc::clone(&shutdown),
        );
        tokio::spawn(link.run(shutdown_rx));
        None
    } else {
        let manager = ClientSessionManager::bind(Arc::clone(&ctx), settings.server.port)
            .await
            .map_err(StartupError::Bind)?;
        let addr = manager.local_addr();
        info!(%addr, "control plane listening");
        tokio::spawn(manager.run(shutdown_rx));
        Some(addr)
    };

    Ok(DaemonHandle {
        addr,
        uuid,
        loopbacks,
        firmware,
        broadcast,
        shutdown,
    })
}
