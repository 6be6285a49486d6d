//! Bounded pipeline queues.
//!
//! Every stage of the pipeline is decoupled by a bounded channel of depth
//! 1024. Producers never block: when a queue is full the newest item is
//! dropped with a logged diagnostic naming the queue, and the pipeline keeps
//! running.

use rf_protocol::BroadcastMessage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

/// Depth of each pipeline queue; pushes beyond this are dropped.
pub const QUEUE_DEPTH: usize = 1024;

/// Producer handle for a named bounded queue.
#[derive(Debug, Clone)]
pub struct QueueTx<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> QueueTx<T> {
    /// Drop-newest push. Returns whether the item was accepted.
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                error!("{} queue full", self.name);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} queue closed", self.name);
                false
            }
        }
    }
}

/// Create a named bounded queue of [`QUEUE_DEPTH`].
pub fn bounded<T>(name: &'static str) -> (QueueTx<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    (QueueTx { name, tx }, rx)
}

// ---------------------------------------------------------------------------
// BroadcastTx
// ---------------------------------------------------------------------------

/// Producer handle for the broadcast queue; stamps the daemon uuid onto
/// envelopes that do not already carry one.
#[derive(Debug, Clone)]
pub struct BroadcastTx {
    queue: QueueTx<BroadcastMessage>,
    uuid: String,
}

impl BroadcastTx {
    pub fn new(queue: QueueTx<BroadcastMessage>, uuid: String) -> Self {
        BroadcastTx { queue, uuid }
    }

    pub fn push(&self, mut msg: BroadcastMessage) -> bool {
        if msg.uuid.is_none() && !self.uuid.is_empty() {
            msg.uuid = Some(self.uuid.clone());
        }
        self.queue.push(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_protocol::Origin;
    use serde_json::json;

    #[test]
    fn push_beyond_depth_drops_newest() {
        let (tx, mut rx) = bounded::<u32>("receiver");
        for i in 0..QUEUE_DEPTH as u32 {
            assert!(tx.push(i));
        }
        assert!(!tx.push(9999));
        let mut drained = 0;
        while let Ok(v) = rx.try_recv() {
            assert_ne!(v, 9999);
            drained += 1;
        }
        assert_eq!(drained, QUEUE_DEPTH);
    }

    #[test]
    fn broadcast_push_stamps_missing_uuid() {
        let (tx, mut rx) = bounded("broadcast");
        let btx = BroadcastTx::new(tx, "1234-aa".into());
        btx.push(BroadcastMessage::new(Origin::Receiver, "kaku_switch", json!({})));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.uuid.as_deref(), Some("1234-aa"));

        let mut tagged = BroadcastMessage::new(Origin::Receiver, "kaku_switch", json!({}));
        tagged.uuid = Some("other".into());
        btx.push(tagged);
        assert_eq!(rx.try_recv().unwrap().uuid.as_deref(), Some("other"));
    }
}
