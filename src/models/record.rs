//! `TestRecord` — an immutable snapshot of a channel at its terminal moment,
//! keyed by `(test_tag, channel_id)` (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::Channel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_tag: String,
    pub channel_id: String,
    pub saved_at: DateTime<Utc>,
    pub channel: Channel,
}

impl TestRecord {
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            test_tag: channel.test_tag.clone(),
            channel_id: channel.id.clone(),
            saved_at: Utc::now(),
            channel: channel.clone(),
        }
    }
}
