//! Per-driver capture loop.
//!
//! One loop runs for every hardware unit with a receive capability: pull a
//! pulse, feed the segment assembler, enqueue completed segments. The loop
//! parks whenever the sender holds the transmit lock so the daemon never
//! captures its own transmission.

use crate::hardware::{HardwareError, HardwareUnit};
use crate::queue::QueueTx;
use crate::transmit::TransmitLock;
use pulse_core::{PulseSegment, SegmentAssembler};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

pub struct CaptureLoop {
    hw: HardwareUnit,
    assembler: SegmentAssembler,
    transmit: TransmitLock,
    receive_q: QueueTx<PulseSegment>,
}

impl CaptureLoop {
    /// `rawlen_bounds` are the registry-wide minimum/maximum raw lengths;
    /// bursts outside them never reach the decoder.
    pub fn new(
        hw: HardwareUnit,
        rawlen_bounds: (usize, usize),
        transmit: TransmitLock,
        receive_q: QueueTx<PulseSegment>,
    ) -> Self {
        let assembler = SegmentAssembler::new(hw.kind(), rawlen_bounds.0, rawlen_bounds.1);
        CaptureLoop {
            hw,
            assembler,
            transmit,
            receive_q,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(hwtype = %self.hw.kind(), "capture loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.transmit.wait_idle().await;
            let pulse = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.hw.recv_pulse() => match result {
                    Ok(d) => d,
                    Err(HardwareError::Disconnected) => {
                        error!(hwtype = %self.hw.kind(), "capture hardware disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(hwtype = %self.hw.kind(), error = %e, "capture receive failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            if pulse == 0 {
                continue;
            }
            if let Some(segment) = self.assembler.push(pulse) {
                self.receive_q.push(segment);
            }
        }
        debug!(hwtype = %self.hw.kind(), "capture loop stopped");
    }
}
