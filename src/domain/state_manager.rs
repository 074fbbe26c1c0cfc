//! C1 — Channel State Manager.
//!
//! The sole authority for mutating a channel's state. Every other
//! component calls into this module rather than touching a `Channel`'s
//! fields directly — `overall_status` in particular is never set, only
//! derived, by [`compute_overall_status`] (invariant 1).
//!
//! Each channel gets its own lock, so one channel's transition never blocks
//! another's (§5's "the Channel State Manager holds a per-channel critical
//! section"). Batch-level callers that need several channels at once must
//! acquire them in `test_id` order — see `domain::batch_gate` — to avoid
//! deadlocking against a concurrent per-channel operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::event_bus::EventBus;
use crate::error::{AppError, AppResult};
use crate::models::{
    Channel, HardPointResult, ModuleType, OverallStatus, RawChannelImport, SubTestItem,
    SubTestStatus,
};

/// Pure function: a channel's overall status derived from its hard-point
/// result, its applicable manual sub-items, and whether it has been
/// operator-skipped. Never called with side effects — callers recompute and
/// assign the result.
pub fn compute_overall_status(
    hard_point_result: HardPointResult,
    sub_tests: &HashMap<SubTestItem, SubTestStatus>,
    skip_reason: Option<&str>,
) -> OverallStatus {
    if skip_reason.is_some() {
        return OverallStatus::Skipped;
    }
    match hard_point_result {
        HardPointResult::NotTested => OverallStatus::NotTested,
        HardPointResult::Waiting | HardPointResult::InProgress => OverallStatus::InProgress,
        HardPointResult::Failed => OverallStatus::Failed,
        HardPointResult::Passed => {
            if sub_tests.is_empty() {
                return OverallStatus::Passed;
            }
            if sub_tests.values().any(|s| matches!(s, SubTestStatus::Failed)) {
                OverallStatus::Failed
            } else if sub_tests
                .values()
                .all(|s| matches!(s, SubTestStatus::Passed | SubTestStatus::Skipped))
            {
                OverallStatus::Passed
            } else {
                OverallStatus::InProgress
            }
        }
    }
}

/// Which addresses a sub-item needs to be eligible, per invariants 4–6.
fn required_address_present(item: SubTestItem, raw: &RawChannelImport) -> bool {
    match item {
        SubTestItem::ShowValue | SubTestItem::TrendCheck | SubTestItem::ReportCheck => true,
        SubTestItem::LowAlarm => raw.sl_setpoint_address.is_some(),
        SubTestItem::LowLowAlarm => raw.sll_setpoint_address.is_some(),
        SubTestItem::HighAlarm => raw.sh_setpoint_address.is_some(),
        SubTestItem::HighHighAlarm => raw.shh_setpoint_address.is_some(),
        SubTestItem::AlarmValueSet => {
            raw.sll_setpoint_address.is_some()
                || raw.sl_setpoint_address.is_some()
                || raw.sh_setpoint_address.is_some()
                || raw.shh_setpoint_address.is_some()
        }
        SubTestItem::Maintenance => raw.maintenance_enable_address.is_some(),
    }
}

pub struct ChannelStateManager {
    channels: Mutex<HashMap<String, Arc<Mutex<Channel>>>>,
    event_bus: EventBus,
}

impl ChannelStateManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self { channels: Mutex::new(HashMap::new()), event_bus }
    }

    /// Build a channel from an import record, auto-skipping sub-items whose
    /// required address is absent (invariants 4–6), and register it.
    pub async fn initialize_from_import(&self, raw: RawChannelImport) -> Channel {
        let applicable = Channel::applicable_sub_items(raw.module_type);
        let mut sub_tests = HashMap::new();
        let mut skip_reasons = HashMap::new();
        for item in applicable {
            if required_address_present(item, &raw) {
                sub_tests.insert(item, SubTestStatus::NotTested);
            } else {
                sub_tests.insert(item, SubTestStatus::Skipped);
                skip_reasons.insert(item, format!("{item} has no configured address"));
            }
        }

        let channel = Channel {
            id: crate::models::default_id(),
            test_id: raw.test_id,
            tag: raw.tag,
            description: raw.description,
            module_type: raw.module_type,
            wire_system: raw.wire_system,
            target_address: raw.target_address,
            test_address: raw.test_address,
            sll_setpoint_address: raw.sll_setpoint_address,
            sl_setpoint_address: raw.sl_setpoint_address,
            sh_setpoint_address: raw.sh_setpoint_address,
            shh_setpoint_address: raw.shh_setpoint_address,
            maintenance_enable_address: raw.maintenance_enable_address,
            range_low: raw.range_low,
            range_high: raw.range_high,
            lll: raw.lll,
            ll: raw.ll,
            h: raw.h,
            hh: raw.hh,
            hard_point_result: HardPointResult::NotTested,
            hard_point_error_detail: None,
            sub_tests,
            skip_reasons,
            sub_test_failure_notes: HashMap::new(),
            v0: None,
            v25: None,
            v50: None,
            v75: None,
            v100: None,
            overall_status: OverallStatus::NotTested,
            skip_reason: None,
            start_time: None,
            final_time: None,
            batch_id: raw.batch_id,
            test_tag: raw.test_tag,
            history: Vec::new(),
        };

        let mut channels = self.channels.lock().await;
        channels.insert(channel.id.clone(), Arc::new(Mutex::new(channel.clone())));
        channel
    }

    async fn handle_of(&self, channel_id: &str) -> AppResult<Arc<Mutex<Channel>>> {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("channel", channel_id))
    }

    pub async fn get_channel(&self, channel_id: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        Ok(handle.lock().await.clone())
    }

    pub async fn list_for_batch(&self, batch_id: &str) -> Vec<Channel> {
        let handles: Vec<Arc<Mutex<Channel>>> = self.channels.lock().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let channel = handle.lock().await.clone();
            if channel.batch_id == batch_id {
                out.push(channel);
            }
        }
        out.sort_by_key(|c| c.test_id);
        out
    }

    fn after_mutation(&self, channel: &mut Channel, reason: &str) {
        channel.overall_status =
            compute_overall_status(channel.hard_point_result, &channel.sub_tests, channel.skip_reason.as_deref());
        if matches!(
            channel.overall_status,
            OverallStatus::Passed | OverallStatus::Failed | OverallStatus::Skipped
        ) && channel.final_time.is_none()
        {
            channel.final_time = Some(Utc::now());
        }
        channel.record_history(reason);
        self.event_bus.publish_channel_states_modified(vec![channel.id.clone()]);
    }

    pub async fn prepare_for_wiring_confirmation(&self, channel_id: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        if !matches!(channel.hard_point_result, HardPointResult::NotTested | HardPointResult::Failed) {
            return Err(AppError::precondition(
                channel_id,
                channel.hard_point_result.to_string(),
                "prepare_for_wiring_confirmation",
                "requires not_tested or failed",
            ));
        }
        channel.hard_point_result = HardPointResult::Waiting;
        self.after_mutation(&mut channel, "wiring confirmed, waiting for hard-point test");
        Ok(channel.clone())
    }

    pub async fn begin_hard_point_test(&self, channel_id: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        if matches!(channel.hard_point_result, HardPointResult::InProgress) {
            return Err(AppError::concurrency(channel_id, "in_progress"));
        }
        if !matches!(channel.hard_point_result, HardPointResult::Waiting) {
            return Err(AppError::precondition(
                channel_id,
                channel.hard_point_result.to_string(),
                "begin_hard_point_test",
                "requires waiting",
            ));
        }
        channel.hard_point_result = HardPointResult::InProgress;
        if channel.start_time.is_none() {
            channel.start_time = Some(Utc::now());
        }
        self.after_mutation(&mut channel, "hard-point test started");
        Ok(channel.clone())
    }

    pub async fn record_hard_point_outcome(
        &self,
        channel_id: &str,
        passed: bool,
        detail: Option<String>,
    ) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        if !matches!(channel.hard_point_result, HardPointResult::InProgress) {
            return Err(AppError::precondition(
                channel_id,
                channel.hard_point_result.to_string(),
                "record_hard_point_outcome",
                "requires in_progress",
            ));
        }
        channel.hard_point_result = if passed { HardPointResult::Passed } else { HardPointResult::Failed };
        channel.hard_point_error_detail = detail;
        let reason = if passed { "hard-point test passed" } else { "hard-point test failed" };
        self.after_mutation(&mut channel, reason);
        Ok(channel.clone())
    }

    /// `_NONE` types bypass the hard-point gate; everything else must have
    /// a passed hard-point result before manual testing may begin.
    pub async fn begin_manual_test(&self, channel_id: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        if matches!(channel.hard_point_result, HardPointResult::InProgress) {
            return Err(AppError::concurrency(channel_id, "in_progress"));
        }
        if channel.requires_hard_point_before_manual() && channel.hard_point_result != HardPointResult::Passed {
            return Err(AppError::precondition(
                channel_id,
                channel.hard_point_result.to_string(),
                "begin_manual_test",
                "requires a passed hard-point test first",
            ));
        }
        for status in channel.sub_tests.values_mut() {
            if matches!(status, SubTestStatus::Failed) {
                *status = SubTestStatus::NotTested;
            }
        }
        self.after_mutation(&mut channel, "manual test session opened");
        Ok(channel.clone())
    }

    /// Idempotent for an already-decided (`passed`/`skipped`) item; sets the
    /// outcome otherwise. Returns the channel unchanged (no-op) when the
    /// item is already decided, matching the "terminal monotonicity"
    /// property. `note` is the operator-entered failure rationale (§7: "a
    /// failure always carries a human-readable reason") — ignored when
    /// `passed` is true, required in practice by callers when it's false.
    pub async fn set_manual_sub_outcome(
        &self,
        channel_id: &str,
        item: SubTestItem,
        passed: bool,
        note: Option<String>,
    ) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        if matches!(channel.hard_point_result, HardPointResult::InProgress) {
            return Err(AppError::concurrency(channel_id, "in_progress"));
        }
        let current = *channel
            .sub_tests
            .get(&item)
            .ok_or_else(|| AppError::applicability(channel_id, item.to_string(), channel.module_type.to_string()))?;
        if matches!(current, SubTestStatus::Passed | SubTestStatus::Skipped) {
            return Ok(channel.clone());
        }
        channel
            .sub_tests
            .insert(item, if passed { SubTestStatus::Passed } else { SubTestStatus::Failed });
        let reason = if passed {
            channel.sub_test_failure_notes.remove(&item);
            format!("{item} set to passed")
        } else {
            if let Some(note) = &note {
                channel.sub_test_failure_notes.insert(item, note.clone());
            }
            match &note {
                Some(note) => format!("{item} set to failed: {note}"),
                None => format!("{item} set to failed"),
            }
        };
        self.after_mutation(&mut channel, &reason);
        self.event_bus.publish_test_status_updated(channel_id);
        Ok(channel.clone())
    }

    pub async fn reset_for_retest(&self, channel_id: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        channel.hard_point_result = HardPointResult::Waiting;
        channel.hard_point_error_detail = None;
        channel.start_time = None;
        channel.final_time = None;
        channel.v0 = None;
        channel.v25 = None;
        channel.v50 = None;
        channel.v75 = None;
        channel.v100 = None;
        for status in channel.sub_tests.values_mut() {
            if !matches!(status, SubTestStatus::Skipped) {
                *status = SubTestStatus::NotTested;
            }
        }
        self.after_mutation(&mut channel, "reset for retest");
        Ok(channel.clone())
    }

    pub async fn mark_as_skipped(&self, channel_id: &str, reason: &str) -> AppResult<Channel> {
        let handle = self.handle_of(channel_id).await?;
        let mut channel = handle.lock().await;
        channel.start_time = None;
        channel.skip_reason = Some(reason.to_string());
        for status in channel.sub_tests.values_mut() {
            *status = SubTestStatus::Skipped;
        }
        self.after_mutation(&mut channel, &format!("skipped: {reason}"));
        Ok(channel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WireSystem;

    fn raw(module_type: ModuleType) -> RawChannelImport {
        RawChannelImport {
            test_id: 1,
            tag: "AI001".into(),
            description: "reactor temperature".into(),
            module_type,
            wire_system: WireSystem::NormallyOpen,
            target_address: "DB1.DBD0".into(),
            test_address: "DB2.DBD0".into(),
            sll_setpoint_address: None,
            sl_setpoint_address: Some("DB1.DBD4".into()),
            sh_setpoint_address: Some("DB1.DBD8".into()),
            shh_setpoint_address: None,
            maintenance_enable_address: None,
            range_low: Some(0.0),
            range_high: Some(100.0),
            lll: None,
            ll: Some(10.0),
            h: Some(90.0),
            hh: None,
            batch_id: "batch-1".into(),
            test_tag: "FAT-2026-07".into(),
        }
    }

    #[tokio::test]
    async fn import_auto_skips_sub_items_missing_their_address() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::AI)).await;
        assert_eq!(channel.sub_tests[&SubTestItem::LowLowAlarm], SubTestStatus::Skipped);
        assert_eq!(channel.sub_tests[&SubTestItem::HighHighAlarm], SubTestStatus::Skipped);
        assert_eq!(channel.sub_tests[&SubTestItem::LowAlarm], SubTestStatus::NotTested);
        assert_eq!(channel.sub_tests[&SubTestItem::Maintenance], SubTestStatus::Skipped);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_mutating_state() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::AI)).await;
        let err = mgr.begin_hard_point_test(&channel.id).await.unwrap_err();
        assert!(matches!(err, AppError::Precondition { .. }));
        let unchanged = mgr.get_channel(&channel.id).await.unwrap();
        assert_eq!(unchanged.hard_point_result, HardPointResult::NotTested);
    }

    #[tokio::test]
    async fn full_happy_path_reaches_passed_overall_status() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::DI)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();
        mgr.begin_hard_point_test(&channel.id).await.unwrap();
        let after = mgr.record_hard_point_outcome(&channel.id, true, None).await.unwrap();
        assert_eq!(after.hard_point_result, HardPointResult::Passed);
        // DI's only applicable sub-item is show_value, still not_tested.
        assert_eq!(after.overall_status, OverallStatus::InProgress);
        mgr.begin_manual_test(&channel.id).await.unwrap();
        let done = mgr.set_manual_sub_outcome(&channel.id, SubTestItem::ShowValue, true, None).await.unwrap();
        assert_eq!(done.overall_status, OverallStatus::Passed);
        assert!(done.final_time.is_some());
    }

    #[tokio::test]
    async fn in_progress_hard_point_rejects_manual_test_and_concurrent_begin() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::DI)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();
        mgr.begin_hard_point_test(&channel.id).await.unwrap();

        let err = mgr.begin_hard_point_test(&channel.id).await.unwrap_err();
        assert!(matches!(err, AppError::Concurrency { .. }));

        let err = mgr.begin_manual_test(&channel.id).await.unwrap_err();
        assert!(matches!(err, AppError::Concurrency { .. }));
    }

    #[tokio::test]
    async fn sub_item_outcome_is_idempotent_once_passed() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::DI)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();
        mgr.begin_hard_point_test(&channel.id).await.unwrap();
        mgr.record_hard_point_outcome(&channel.id, true, None).await.unwrap();
        mgr.begin_manual_test(&channel.id).await.unwrap();
        mgr.set_manual_sub_outcome(&channel.id, SubTestItem::ShowValue, true, None).await.unwrap();
        // Second call is a no-op; flipping to "failed" must not take effect.
        let after = mgr
            .set_manual_sub_outcome(&channel.id, SubTestItem::ShowValue, false, Some("retest".into()))
            .await
            .unwrap();
        assert_eq!(after.sub_tests[&SubTestItem::ShowValue], SubTestStatus::Passed);
    }

    #[tokio::test]
    async fn a_manual_failure_note_is_recorded_and_cleared_on_a_later_pass() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::DI)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();
        mgr.begin_hard_point_test(&channel.id).await.unwrap();
        mgr.record_hard_point_outcome(&channel.id, true, None).await.unwrap();
        mgr.begin_manual_test(&channel.id).await.unwrap();

        let failed = mgr
            .set_manual_sub_outcome(&channel.id, SubTestItem::ShowValue, false, Some("lamp did not illuminate".into()))
            .await
            .unwrap();
        assert_eq!(
            failed.sub_test_failure_notes[&SubTestItem::ShowValue],
            "lamp did not illuminate"
        );

        mgr.begin_manual_test(&channel.id).await.unwrap();
        let passed = mgr.set_manual_sub_outcome(&channel.id, SubTestItem::ShowValue, true, None).await.unwrap();
        assert!(!passed.sub_test_failure_notes.contains_key(&SubTestItem::ShowValue));
    }

    #[tokio::test]
    async fn mark_as_skipped_forces_overall_status_regardless_of_hard_point_state() {
        let mgr = ChannelStateManager::new(EventBus::new());
        let channel = mgr.initialize_from_import(raw(ModuleType::AI)).await;
        let after = mgr.mark_as_skipped(&channel.id, "reserved for future phase").await.unwrap();
        assert_eq!(after.overall_status, OverallStatus::Skipped);
        assert!(after.sub_tests.values().all(|s| matches!(s, SubTestStatus::Skipped)));
    }
}
