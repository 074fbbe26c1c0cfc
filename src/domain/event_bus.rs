//! C9 — Event Bus.
//!
//! Single-producer-multi-consumer, deliver-on-next-tick, no back-pressure:
//! events are coalescable, and recomputation on the subscriber side is
//! idempotent, so a slow or absent subscriber missing one is fine (§4.9).
//! Built on `tokio::sync::broadcast` — a lagging subscriber just skips
//! ahead rather than blocking the publisher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Coarse signal: these channel ids changed, go recompute whatever you show
/// for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatesModified {
    pub ids: Vec<String>,
}

/// Fires after any manual sub-item mutation so action buttons can recompute
/// disabled state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStatusUpdated {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ChannelStatesModified(ChannelStatesModified),
    TestStatusUpdated(TestStatusUpdated),
}

const CHANNEL_CAPACITY: usize = 1024;

/// Owns the broadcast channel. Cheap to clone (it's a handle); every
/// component that needs to publish or subscribe holds one.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish is deliberately infallible from the caller's point of view —
    /// "no subscribers yet" is not an error, it just means nobody's
    /// listening this tick.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn publish_channel_states_modified(&self, ids: Vec<String>) {
        self.publish(Event::ChannelStatesModified(ChannelStatesModified { ids }));
    }

    pub fn publish_test_status_updated(&self, channel_id: impl Into<String>) {
        self.publish(Event::TestStatusUpdated(TestStatusUpdated { channel_id: channel_id.into() }));
    }
}
