//! C7 — Batch & Wiring Gate.
//!
//! Batches are a grouping view over channels already registered with C1,
//! not a second source of truth — `confirm_wiring` and `skip_modules` both
//! delegate the actual state change back to `ChannelStateManager` and only
//! own the batch-level bookkeeping (status, statistics) themselves (§4.7).

use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::domain::state_manager::ChannelStateManager;
use crate::error::{AppError, AppResult};
use crate::models::{Batch, BatchStatistics, BatchStatus, HardPointResult, OverallStatus};

pub struct BatchGate {
    state_manager: Arc<ChannelStateManager>,
    batches: Mutex<std::collections::HashMap<String, Batch>>,
}

impl BatchGate {
    pub fn new(state_manager: Arc<ChannelStateManager>) -> Self {
        Self { state_manager, batches: Mutex::new(std::collections::HashMap::new()) }
    }

    pub async fn register_batch(&self, batch: Batch) {
        self.batches.lock().await.insert(batch.name.clone(), batch);
    }

    pub async fn get_batch(&self, name: &str) -> AppResult<Batch> {
        self.batches.lock().await.get(name).cloned().ok_or_else(|| AppError::not_found("batch", name))
    }

    /// Move every not-tested/failed channel in the batch to `waiting`,
    /// rejecting the call outright if the batch is already under test
    /// (§4.7's "wiring confirmation is a one-time gate per batch run").
    pub async fn confirm_wiring(&self, batch_name: &str) -> AppResult<Batch> {
        let mut batches = self.batches.lock().await;
        let batch = batches.get_mut(batch_name).ok_or_else(|| AppError::not_found("batch", batch_name))?;
        if matches!(batch.status, BatchStatus::Testing) {
            return Err(AppError::precondition(batch_name, "testing", "confirm_wiring", "batch is already under test"));
        }

        for channel_id in &batch.channel_ids {
            match self.state_manager.prepare_for_wiring_confirmation(channel_id).await {
                Ok(_) => {}
                Err(AppError::Precondition { .. }) => {
                    // Already-skipped or already-waiting channels are fine to
                    // leave as-is; only a hard failure here is unexpected.
                }
                Err(e) => return Err(e),
            }
        }
        batch.status = BatchStatus::WiringConfirmed;
        info!("batch {batch_name} wiring confirmed");
        Ok(batch.clone())
    }

    pub async fn mark_testing(&self, batch_name: &str) -> AppResult<()> {
        let mut batches = self.batches.lock().await;
        let batch = batches.get_mut(batch_name).ok_or_else(|| AppError::not_found("batch", batch_name))?;
        batch.status = BatchStatus::Testing;
        Ok(())
    }

    /// Bulk-skip a set of channel ids with one shared reason (§4.7's
    /// "reserved for future phase" operator workflow).
    pub async fn skip_modules(&self, channel_ids: &[String], reason: &str) -> AppResult<()> {
        for channel_id in channel_ids {
            self.state_manager.mark_as_skipped(channel_id, reason).await?;
        }
        Ok(())
    }

    /// Recompute statistics from C1's live channel state — never cached,
    /// per the design's "batch statistics are a derived value" decision.
    pub async fn statistics(&self, batch_name: &str) -> AppResult<BatchStatistics> {
        let batch = self.get_batch(batch_name).await?;
        let channels = self.state_manager.list_for_batch(batch_name).await;
        let mut stats = BatchStatistics::default();
        stats.total = channels.len();
        for channel in &channels {
            match channel.overall_status {
                OverallStatus::Passed => stats.passed += 1,
                OverallStatus::Failed => stats.failed += 1,
                OverallStatus::Skipped => stats.skipped += 1,
                OverallStatus::InProgress => {
                    if matches!(channel.hard_point_result, HardPointResult::Waiting) {
                        stats.waiting += 1;
                    } else {
                        stats.in_progress += 1;
                    }
                }
                OverallStatus::NotTested => stats.not_tested += 1,
            }
        }
        let _ = batch;
        Ok(stats)
    }

    /// True once every channel in the batch has a terminal `overall_status`
    /// — the scheduler's cue to flip the batch to `Completed`.
    pub async fn is_batch_complete(&self, batch_name: &str) -> bool {
        let channels = self.state_manager.list_for_batch(batch_name).await;
        !channels.is_empty()
            && channels.iter().all(|c| {
                matches!(c.overall_status, OverallStatus::Passed | OverallStatus::Failed | OverallStatus::Skipped)
            })
    }

    pub async fn complete_if_done(&self, batch_name: &str) -> AppResult<bool> {
        if self.is_batch_complete(batch_name).await {
            let mut batches = self.batches.lock().await;
            if let Some(batch) = batches.get_mut(batch_name) {
                batch.status = BatchStatus::Completed;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_bus::EventBus;
    use crate::models::{ModuleType, RawChannelImport, WireSystem};

    fn raw(test_id: u32, batch_id: &str) -> RawChannelImport {
        RawChannelImport {
            test_id,
            tag: format!("DI{test_id:03}"),
            description: "switch".into(),
            module_type: ModuleType::DI,
            wire_system: WireSystem::NormallyOpen,
            target_address: format!("target_{test_id}"),
            test_address: format!("test_{test_id}"),
            sll_setpoint_address: None,
            sl_setpoint_address: None,
            sh_setpoint_address: None,
            shh_setpoint_address: None,
            maintenance_enable_address: None,
            range_low: None,
            range_high: None,
            lll: None,
            ll: None,
            h: None,
            hh: None,
            batch_id: batch_id.to_string(),
            test_tag: "tag1".into(),
        }
    }

    #[tokio::test]
    async fn confirm_wiring_moves_not_tested_channels_to_waiting() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let c1 = mgr.initialize_from_import(raw(1, "batch-a")).await;
        let c2 = mgr.initialize_from_import(raw(2, "batch-a")).await;
        let gate = BatchGate::new(mgr.clone());
        gate.register_batch(Batch::new("batch-a", vec![c1.id.clone(), c2.id.clone()], vec!["station-1".into()])).await;

        gate.confirm_wiring("batch-a").await.unwrap();
        let after1 = mgr.get_channel(&c1.id).await.unwrap();
        assert_eq!(after1.hard_point_result, HardPointResult::Waiting);
    }

    #[tokio::test]
    async fn confirm_wiring_twice_rejects_when_already_testing() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let c1 = mgr.initialize_from_import(raw(1, "batch-b")).await;
        let gate = BatchGate::new(mgr.clone());
        gate.register_batch(Batch::new("batch-b", vec![c1.id.clone()], vec![])).await;
        gate.confirm_wiring("batch-b").await.unwrap();
        gate.mark_testing("batch-b").await.unwrap();
        let err = gate.confirm_wiring("batch-b").await.unwrap_err();
        assert!(matches!(err, AppError::Precondition { .. }));
    }

    #[tokio::test]
    async fn skip_modules_is_reflected_in_statistics() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let c1 = mgr.initialize_from_import(raw(1, "batch-c")).await;
        let c2 = mgr.initialize_from_import(raw(2, "batch-c")).await;
        let gate = BatchGate::new(mgr.clone());
        gate.register_batch(Batch::new("batch-c", vec![c1.id.clone(), c2.id.clone()], vec![])).await;

        gate.skip_modules(&[c1.id.clone()], "reserved for phase 2").await.unwrap();
        let stats = gate.statistics("batch-c").await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.not_tested, 1);
    }
}
