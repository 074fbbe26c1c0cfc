//! `Batch` — a group of channels tested together under one wiring
//! confirmation (§3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::BatchStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    pub channel_ids: Vec<String>,
    pub status: BatchStatus,
    pub station_names: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(name: impl Into<String>, channel_ids: Vec<String>, station_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            channel_ids,
            status: BatchStatus::NotStarted,
            station_names,
            created_at: Utc::now(),
        }
    }
}

/// Derived counts over a batch's channels — recomputed on read, never stored
/// as the source of truth.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub waiting: usize,
    pub in_progress: usize,
    pub not_tested: usize,
}
