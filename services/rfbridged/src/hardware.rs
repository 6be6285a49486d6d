//! Radio hardware drivers.
//!
//! A driver exposes `init`/`deinit`, a blocking single-pulse `receive`, a
//! pulse-train `send`, and its hardware class tag. Variants:
//!
//! - `Serial433`: a 433 MHz transceiver stick on a serial device speaking
//!   newline-framed ASCII pulse durations in both directions.
//! - `Loopback`: an in-process channel pair, used for simulated setups and
//!   the integration tests; `send` models airtime by sleeping for the total
//!   duration of the pulse train.
//! - `NoRadio`: a placeholder with no capture or transmit capability.
//!
//! A `receive` may yield 0 (no edge within the poll window); the capture
//! loop drops those. All units are shared behind a mutex so the sender and
//! the capture loop never talk to the device at the same time.

use pulse_core::HwType;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// How long a single `receive` waits for an edge before reporting "none".
const RECV_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("device disconnected")]
    Disconnected,
    #[error("operation not supported by this hardware")]
    Unsupported,
}

// ---------------------------------------------------------------------------
// Driver variants
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Hardware {
    Serial433(Serial433),
    Loopback(Loopback),
    NoRadio,
}

impl Hardware {
    pub async fn init(&mut self) -> Result<(), HardwareError> {
        match self {
            Hardware::Serial433(hw) => hw.init().await,
            Hardware::Loopback(_) | Hardware::NoRadio => Ok(()),
        }
    }

    pub async fn deinit(&mut self) {
        if let Hardware::Serial433(hw) = self {
            hw.deinit();
        }
    }

    /// One pulse duration in microseconds; 0 when no edge arrived within the
    /// poll window.
    pub async fn recv_pulse(&mut self) -> Result<u32, HardwareError> {
        match self {
            Hardware::Serial433(hw) => hw.recv_pulse().await,
            Hardware::Loopback(hw) => hw.recv_pulse().await,
            Hardware::NoRadio => Err(HardwareError::Unsupported),
        }
    }

    /// Transmit an already-expanded pulse train.
    pub async fn send(&mut self, pulses: &[u32]) -> Result<(), HardwareError> {
        match self {
            Hardware::Serial433(hw) => hw.send(pulses).await,
            Hardware::Loopback(hw) => hw.send(pulses).await,
            Hardware::NoRadio => Err(HardwareError::Unsupported),
        }
    }

    fn has_receive(&self) -> bool {
        !matches!(self, Hardware::NoRadio)
    }

    fn has_send(&self) -> bool {
        !matches!(self, Hardware::NoRadio)
    }
}

// ---------------------------------------------------------------------------
// Serial433
// ---------------------------------------------------------------------------

/// A transceiver on a serial character device. Each received line is one
/// pulse duration in ASCII decimal; a transmission is written as one
/// space-separated line.
#[derive(Debug)]
pub struct Serial433 {
    device: PathBuf,
    reader: Option<Lines<BufReader<File>>>,
    writer: Option<File>,
}

impl Serial433 {
    pub fn new(device: PathBuf) -> Self {
        Serial433 {
            device,
            reader: None,
            writer: None,
        }
    }

    async fn init(&mut self) -> Result<(), HardwareError> {
        let read = File::open(&self.device).await?;
        self.reader = Some(BufReader::new(read).lines());
        self.writer = Some(OpenOptions::new().write(true).open(&self.device).await?);
        debug!(device = %self.device.display(), "serial433 initialized");
        Ok(())
    }

    fn deinit(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    async fn recv_pulse(&mut self) -> Result<u32, HardwareError> {
        let reader = self.reader.as_mut().ok_or(HardwareError::Unsupported)?;
        match tokio::time::timeout(RECV_POLL, reader.next_line()).await {
            Err(_elapsed) => Ok(0),
            Ok(Ok(None)) => Err(HardwareError::Disconnected),
            Ok(Ok(Some(line))) => Ok(line.trim().parse::<u32>().unwrap_or(0)),
            Ok(Err(e)) => Err(HardwareError::Io(e)),
        }
    }

    async fn send(&mut self, pulses: &[u32]) -> Result<(), HardwareError> {
        let writer = self.writer.as_mut().ok_or(HardwareError::Unsupported)?;
        let mut line = String::with_capacity(pulses.len() * 5);
        for (i, p) in pulses.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&p.to_string());
        }
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

/// In-process driver: received pulses come from a channel, transmissions are
/// recorded on another. With `airtime` set, `send` sleeps for the summed
/// duration of the train, so transmit-lock behavior is observable.
#[derive(Debug)]
pub struct Loopback {
    rx: mpsc::Receiver<u32>,
    sent: mpsc::UnboundedSender<Vec<u32>>,
    airtime: bool,
}

/// Test/simulation side of a [`Loopback`]: feed pulses in, observe
/// transmissions out.
#[derive(Debug)]
pub struct LoopbackHandle {
    pub pulse_tx: mpsc::Sender<u32>,
    pub sent_rx: mpsc::UnboundedReceiver<Vec<u32>>,
}

impl Loopback {
    pub fn pair(airtime: bool) -> (Loopback, LoopbackHandle) {
        let (pulse_tx, rx) = mpsc::channel(4096);
        let (sent, sent_rx) = mpsc::unbounded_channel();
        (
            Loopback { rx, sent, airtime },
            LoopbackHandle { pulse_tx, sent_rx },
        )
    }

    async fn recv_pulse(&mut self) -> Result<u32, HardwareError> {
        match tokio::time::timeout(RECV_POLL, self.rx.recv()).await {
            Err(_elapsed) => Ok(0),
            Ok(None) => Err(HardwareError::Disconnected),
            Ok(Some(d)) => Ok(d),
        }
    }

    async fn send(&mut self, pulses: &[u32]) -> Result<(), HardwareError> {
        let _ = self.sent.send(pulses.to_vec());
        if self.airtime {
            let total: u64 = pulses.iter().map(|&p| u64::from(p)).sum();
            tokio::time::sleep(Duration::from_micros(total)).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HardwareUnit
// ---------------------------------------------------------------------------

/// One configured driver, shareable between the capture loop and the sender.
#[derive(Debug, Clone)]
pub struct HardwareUnit {
    kind: HwType,
    has_receive: bool,
    has_send: bool,
    inner: Arc<Mutex<Hardware>>,
}

impl HardwareUnit {
    pub fn new(kind: HwType, hw: Hardware) -> Self {
        let has_receive = hw.has_receive();
        let has_send = hw.has_send();
        HardwareUnit {
            kind,
            has_receive,
            has_send,
            inner: Arc::new(Mutex::new(hw)),
        }
    }

    pub fn kind(&self) -> HwType {
        self.kind
    }

    pub fn has_receive(&self) -> bool {
        self.has_receive
    }

    pub fn has_send(&self) -> bool {
        self.has_send
    }

    pub async fn init(&self) -> Result<(), HardwareError> {
        self.inner.lock().await.init().await
    }

    pub async fn deinit(&self) {
        self.inner.lock().await.deinit().await;
    }

    pub async fn recv_pulse(&self) -> Result<u32, HardwareError> {
        self.inner.lock().await.recv_pulse().await
    }

    pub async fn send(&self, pulses: &[u32]) -> Result<(), HardwareError> {
        self.inner.lock().await.send(pulses).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_receives_fed_pulses() {
        let (hw, handle) = Loopback::pair(false);
        let unit = HardwareUnit::new(HwType::Rf433, Hardware::Loopback(hw));
        handle.pulse_tx.send(270).await.unwrap();
        assert_eq!(unit.recv_pulse().await.unwrap(), 270);
        // Nothing pending: poll window elapses with a zero.
        assert_eq!(unit.recv_pulse().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn loopback_records_transmissions() {
        let (hw, mut handle) = Loopback::pair(false);
        let unit = HardwareUnit::new(HwType::Rf433, Hardware::Loopback(hw));
        unit.send(&[270, 810, 0]).await.unwrap();
        assert_eq!(handle.sent_rx.recv().await.unwrap(), vec![270, 810, 0]);
    }

    #[tokio::test]
    async fn no_radio_supports_nothing() {
        let unit = HardwareUnit::new(HwType::Api, Hardware::NoRadio);
        assert!(!unit.has_receive());
        assert!(matches!(
            unit.send(&[1]).await,
            Err(HardwareError::Unsupported)
        ));
    }
}
