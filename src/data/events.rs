//! Data change notifications
//!
//! Subscribers receive a `DataChanged` event after every mutation so they
//! can refresh without polling. Dropping a `Subscription` unsubscribes.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use super::partition::StoreName;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why data changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    AddOrUpdate,
    BulkUpsert,
    Delete,
    Import,
    Clear,
}

/// One change notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataChanged {
    pub reason: ChangeReason,
    /// Cycle the change happened in; `None` for the shared users partition
    pub cycle: Option<String>,
    /// Partition touched; `None` when the change spans partitions
    pub partition: Option<StoreName>,
    /// Record counts per partition name
    pub counts: BTreeMap<String, usize>,
}

impl DataChanged {
    pub fn new(reason: ChangeReason, cycle: Option<&str>, partition: Option<StoreName>) -> Self {
        Self {
            reason,
            cycle: cycle.map(str::to_string),
            partition,
            counts: BTreeMap::new(),
        }
    }

    pub fn with_count(mut self, partition: StoreName, count: usize) -> Self {
        self.counts.insert(partition.as_str().to_string(), count);
        self
    }
}

/// Broadcast bus for `DataChanged` events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataChanged>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DataChanged) {
        tracing::debug!(reason = ?event.reason, cycle = ?event.cycle, "Data changed");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to the event bus
pub struct Subscription {
    receiver: broadcast::Receiver<DataChanged>,
}

impl Subscription {
    /// Wait for the next event
    ///
    /// Events missed because the subscriber fell behind are skipped with a
    /// warning. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<DataChanged> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly end the subscription
    pub fn unsubscribe(self) {}
}
