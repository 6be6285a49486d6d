//! Self monitor.
//!
//! Every three seconds the daemon publishes its own CPU and RAM usage as a
//! config broadcast under the `process` protocol. Sustained pressure above
//! 60 % (two checks ten seconds apart) stops the daemon cleanly; above 90 %
//! it exits on the spot.

use crate::queue::BroadcastTx;
use rf_protocol::{BroadcastMessage, Origin};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::error;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(3);
const RECHECK_DELAY: Duration = Duration::from_secs(10);
const SOFT_LIMIT_PCT: f64 = 60.0;
const HARD_LIMIT_PCT: f64 = 90.0;

pub struct SelfMonitor {
    broadcast: BroadcastTx,
    shutdown_trigger: Arc<watch::Sender<bool>>,
}

impl SelfMonitor {
    pub fn new(broadcast: BroadcastTx, shutdown_trigger: Arc<watch::Sender<bool>>) -> Self {
        SelfMonitor {
            broadcast,
            shutdown_trigger,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sampler = CpuSampler::new();
        let mut rechecking = false;
        loop {
            let pause = if rechecking { RECHECK_DELAY } else { SAMPLE_INTERVAL };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                () = tokio::time::sleep(pause) => {}
            }

            let cpu = sampler.cpu_percent();
            let ram = ram_percent();

            if cpu > HARD_LIMIT_PCT || ram > HARD_LIMIT_PCT {
                error!(cpu, ram, "resource usage way too high, exiting");
                std::process::exit(1);
            }
            if cpu > SOFT_LIMIT_PCT || ram > SOFT_LIMIT_PCT {
                if rechecking {
                    error!(cpu, ram, "resource usage still too high, stopping");
                    let _ = self.shutdown_trigger.send(true);
                    return;
                }
                error!(cpu, ram, "resource usage too high, checking again in 10 seconds");
                rechecking = true;
                continue;
            }
            rechecking = false;

            let mut msg = BroadcastMessage::new(
                Origin::Config,
                "process",
                json!({ "cpu": cpu, "ram": ram }),
            );
            msg.extra.insert("type".into(), serde_json::Value::from(6));
            self.broadcast.push(msg);
        }
    }
}

// ---------------------------------------------------------------------------
// /proc sampling
// ---------------------------------------------------------------------------

struct CpuSampler {
    last_jiffies: u64,
    last_sample: Instant,
    ticks_per_sec: f64,
}

impl CpuSampler {
    fn new() -> Self {
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        CpuSampler {
            last_jiffies: process_jiffies().unwrap_or(0),
            last_sample: Instant::now(),
            ticks_per_sec: if ticks > 0 { ticks as f64 } else { 100.0 },
        }
    }

    /// Process CPU share since the previous sample, in percent.
    fn cpu_percent(&mut self) -> f64 {
        let Some(jiffies) = process_jiffies() else {
            return 0.0;
        };
        let elapsed = self.last_sample.elapsed().as_secs_f64();
        let delta = jiffies.saturating_sub(self.last_jiffies) as f64;
        self.last_jiffies = jiffies;
        self.last_sample = Instant::now();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (delta / self.ticks_per_sec / elapsed) * 100.0
    }
}

/// utime + stime of this process, in clock ticks.
fn process_jiffies() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Fields 14/15 counted from the pid; the comm field may contain spaces,
    // so index from the closing paren.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Resident set of this process as a share of MemTotal, in percent.
fn ram_percent() -> f64 {
    let Some(resident_pages) = std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| s.split_whitespace().nth(1).and_then(|f| f.parse::<u64>().ok()))
    else {
        return 0.0;
    };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return 0.0;
    }
    let Some(total_kib) = std::fs::read_to_string("/proc/meminfo").ok().and_then(|s| {
        s.lines()
            .find(|l| l.starts_with("MemTotal:"))
            .and_then(|l| l.split_whitespace().nth(1).and_then(|f| f.parse::<u64>().ok()))
    }) else {
        return 0.0;
    };
    if total_kib == 0 {
        return 0.0;
    }
    let resident = resident_pages.saturating_mul(page_size as u64);
    (resident as f64 / (total_kib as f64 * 1024.0)) * 100.0
}
