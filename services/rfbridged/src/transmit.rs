//! Transmit/receive mutual exclusion on the shared radio.
//!
//! One lock serializes the radio: the sender holds it for the full duration
//! of a transmission, and every capture loop waits for it to be free before
//! each blocking receive. Without this the daemon would decode its own
//! transmissions as external events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct TransmitLock {
    lock: Arc<Mutex<()>>,
    sending: Arc<AtomicBool>,
}

impl TransmitLock {
    pub fn new() -> Self {
        TransmitLock::default()
    }

    /// Acquire the radio for transmission. Capture loops stay parked until
    /// the returned guard drops.
    pub async fn acquire(&self) -> TransmitGuard {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.sending.store(true, Ordering::SeqCst);
        TransmitGuard {
            _guard: guard,
            sending: Arc::clone(&self.sending),
        }
    }

    /// Block until no transmission is in flight. Cheap when idle: the flag
    /// check avoids touching the mutex on the hot capture path.
    pub async fn wait_idle(&self) {
        if self.sending.load(Ordering::SeqCst) {
            let _released = self.lock.lock().await;
        }
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TransmitGuard {
    _guard: OwnedMutexGuard<()>,
    sending: Arc<AtomicBool>,
}

impl Drop for TransmitGuard {
    fn drop(&mut self) {
        self.sending.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_idle_parks_until_guard_drops() {
        let lock = TransmitLock::new();
        let guard = lock.acquire().await;
        assert!(lock.is_sending());

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.wait_idle().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "capture must stay parked while sending");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake after release")
            .unwrap();
        assert!(!lock.is_sending());
    }

    #[tokio::test]
    async fn wait_idle_is_immediate_when_free() {
        let lock = TransmitLock::new();
        tokio::time::timeout(Duration::from_millis(50), lock.wait_idle())
            .await
            .expect("idle wait must not block");
    }
}
