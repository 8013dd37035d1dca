//! Snapshot fan-out to any number of subscribers
//!
//! Publishing never waits for a subscriber. Each subscriber owns a bounded
//! ring; when it falls behind, the oldest snapshots are overwritten and the
//! subscriber is told how many it missed.

use crate::task::TaskSnapshot;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Publish point for task snapshots
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<TaskSnapshot>,
}

impl ProgressBroadcaster {
    /// Create a broadcaster buffering up to `capacity` snapshots per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send a snapshot to every current subscriber
    pub fn publish(&self, snapshot: TaskSnapshot) {
        // No subscribers is not an error
        let _ = self.tx.send(snapshot);
    }

    /// Start receiving snapshots published from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    /// Stop receiving snapshots
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of a [`ProgressBroadcaster`]
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<TaskSnapshot>,
    dropped: u64,
}

impl Subscription {
    /// Next snapshot, or `None` once the broadcaster is gone
    ///
    /// Snapshots overwritten while this subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<TaskSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(missed)) => self.record_lag(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next snapshot if one is buffered
    pub fn try_recv(&mut self) -> Option<TaskSnapshot> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(TryRecvError::Lagged(missed)) => self.record_lag(missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots this subscriber missed by falling behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, missed: u64) {
        warn!("Progress subscriber lagged, dropped {} snapshots", missed);
        self.dropped += missed;
    }
}
