//! Notification fanout for job-state transitions.
//!
//! Fanout is fire-and-forget: publishing succeeds from the caller's point of
//! view whether there are zero, one, or many live subscribers, and a delivery
//! problem never blocks or fails the state transition that triggered it.

use crate::job::JobEvent;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Trait for live-subscription collaborators.
pub trait Publisher: Send + Sync {
    /// Push a job-state transition to the owner's subscribers.
    fn publish(&self, owner_id: &str, event: JobEvent);
}

/// Publisher that drops every event. Used where no live subscription
/// transport is wired up (one-shot CLI commands, some tests).
#[derive(Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _owner_id: &str, _event: JobEvent) {}
}

const CHANNEL_CAPACITY: usize = 64;

/// In-process fanout hub over per-owner broadcast channels.
///
/// Slow subscribers lag and miss events rather than applying backpressure to
/// the orchestration core.
#[derive(Default)]
pub struct BroadcastHub {
    channels: RwLock<HashMap<String, broadcast::Sender<JobEvent>>>,
}

impl BroadcastHub {
    /// Create a new hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an owner's job events.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Publisher for BroadcastHub {
    fn publish(&self, owner_id: &str, event: JobEvent) {
        let channels = self.channels.read().unwrap();
        match channels.get(owner_id) {
            Some(tx) => {
                // Send only fails when every receiver is gone, which is the
                // same as having no subscribers: not an error.
                let delivered = tx.send(event).unwrap_or(0);
                debug!("Published job event to {} subscriber(s)", delivered);
            }
            None => {
                debug!("No subscribers for owner {}, dropping event", owner_id);
            }
        }
    }
}
