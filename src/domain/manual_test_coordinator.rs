//! C5 — Manual Test Coordinator.
//!
//! Owns a `ManualTestSession` scoped to one channel at a time (§4.5): the
//! operator opens a session after a passed hard-point test, drives stimulus
//! commands per module type, and every sub-item commit is routed through
//! `ChannelStateManager` rather than mutated here directly. `TestCompleted`
//! fires at most once per session, on the false->true edge of "every
//! applicable sub-item is decided".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::domain::plc_gateway::PlcGateway;
use crate::domain::state_manager::ChannelStateManager;
use crate::error::{AppError, AppResult};
use crate::models::{Channel, ModuleType, SubTestItem, SubTestStatus};

/// AO manual test requires five distinct engineering-value captures before
/// "confirm pass" is accepted (§4.5 point 3) — tracked independently of the
/// hard-point sweep's own v0..v100, since the manual capture is operator
/// driven rather than automatic.
#[derive(Debug, Clone, Default)]
pub struct AoCaptureState {
    captured: [bool; 5],
}

impl AoCaptureState {
    pub fn capture(&mut self, checkpoint_index: usize) -> AppResult<()> {
        if checkpoint_index >= 5 {
            return Err(AppError::validation("AO checkpoint index must be 0..=4"));
        }
        self.captured[checkpoint_index] = true;
        Ok(())
    }

    pub fn all_captured(&self) -> bool {
        self.captured.iter().all(|c| *c)
    }
}

#[derive(Debug, Clone)]
pub enum ManualEvent {
    /// Every applicable sub-item for this session's channel is now
    /// decided (Passed or Skipped) — the false->true edge, fired once.
    TestCompleted { channel_id: String },
    /// One ~500ms live-monitoring poll, formatted per §4.5's key
    /// vocabulary (`current_value`/`current_output`/`current_state`,
    /// `sll_setpoint`/`sl_setpoint`/`sh_setpoint`/`shh_setpoint`).
    ValuesUpdated { channel_id: String, values: HashMap<String, String> },
}

/// Digital points are published as `true`/`false`; everything else (live
/// values and setpoints) is read as an engineering-unit float.
fn is_digital_monitor_key(key: &str) -> bool {
    key == "current_state"
}

/// One active operator session against a single channel. Dropped (or
/// explicitly closed) when the operator moves to another channel — holding
/// more than one open at a time is a caller error the session type doesn't
/// prevent by itself, since only one can usefully own the live-monitor task.
pub struct ManualTestSession {
    pub channel_id: String,
    module_type: ModuleType,
    state_manager: Arc<ChannelStateManager>,
    target_plc: Arc<dyn PlcGateway>,
    ao_capture: Mutex<AoCaptureState>,
    completed_edge_fired: Mutex<bool>,
    events: broadcast::Sender<ManualEvent>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ManualTestSession {
    /// Opens the session via C1 (enforces the hard-point-passed precondition
    /// and resets any previously-failed sub-item back to not-tested).
    pub async fn open(
        state_manager: Arc<ChannelStateManager>,
        target_plc: Arc<dyn PlcGateway>,
        channel_id: &str,
    ) -> AppResult<Self> {
        let channel = state_manager.begin_manual_test(channel_id).await?;
        let (tx, _rx) = broadcast::channel(16);
        Ok(Self {
            channel_id: channel_id.to_string(),
            module_type: channel.module_type,
            state_manager,
            target_plc,
            ao_capture: Mutex::new(AoCaptureState::default()),
            completed_edge_fired: Mutex::new(false),
            events: tx,
            monitor_handle: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManualEvent> {
        self.events.subscribe()
    }

    /// Live-read the target PLC for display purposes — not gated on any
    /// sub-item, safe to call as often as the UI's ~500ms poll wants.
    pub async fn read_live_value(&self, address: &str) -> AppResult<f32> {
        self.target_plc.read_analog(address).await
    }

    pub async fn read_live_digital(&self, address: &str) -> AppResult<bool> {
        self.target_plc.read_digital(address).await
    }

    /// Start (or restart) a ~500ms live-monitoring poll over `key_map`
    /// (address -> display key), publishing `ValuesUpdated` snapshots
    /// through [`Self::subscribe`] (§4.5 point 1). Calling this again
    /// while a poll is already running replaces it rather than stacking a
    /// second task — `start_monitoring` is itself idempotent for the same
    /// reason `stop_monitoring` is.
    pub async fn start_monitoring(&self, key_map: HashMap<String, String>) {
        self.stop_monitoring().await;

        let target_plc = self.target_plc.clone();
        let events = self.events.clone();
        let channel_id = self.channel_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                let mut values = HashMap::with_capacity(key_map.len());
                for (address, key) in &key_map {
                    // A transient transport error surfaces as a
                    // placeholder rather than tearing down the session
                    // (§7, "monitoring produces a reading… placeholder").
                    let formatted = if is_digital_monitor_key(key) {
                        match target_plc.read_digital(address).await {
                            Ok(v) => v.to_string(),
                            Err(_) => "reading…".to_string(),
                        }
                    } else {
                        match target_plc.read_analog(address).await {
                            Ok(v) => format!("{v}"),
                            Err(_) => "reading…".to_string(),
                        }
                    };
                    values.insert(key.clone(), formatted);
                }
                // No subscribers is not an error — the operator's UI may
                // not have attached yet; keep polling so a later
                // subscriber sees the next tick.
                let _ = events.send(ManualEvent::ValuesUpdated { channel_id: channel_id.clone(), values });
            }
        });

        *self.monitor_handle.lock().await = Some(handle);
    }

    /// Idempotent: calling this with no poll running is a no-op.
    pub async fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Commit a sub-item outcome through C1, then check whether this
    /// session has just crossed the completion edge. `note` is the
    /// operator-entered failure rationale (§7) — only meaningful when
    /// `passed` is false.
    pub async fn commit(&self, item: SubTestItem, passed: bool, note: Option<String>) -> AppResult<Channel> {
        let channel = self.state_manager.set_manual_sub_outcome(&self.channel_id, item, passed, note).await?;
        self.maybe_fire_completed(&channel).await;
        Ok(channel)
    }

    /// AO-only: record one of the five required checkpoint captures.
    /// "Confirm pass" (a `commit(ShowValue, true)` call) is left to the
    /// caller to gate on `ao_capture_complete()` first.
    pub async fn capture_ao_checkpoint(&self, checkpoint_index: usize) -> AppResult<()> {
        if !matches!(self.module_type, ModuleType::AO) {
            return Err(AppError::applicability(
                &self.channel_id,
                SubTestItem::ShowValue.to_string(),
                self.module_type.to_string(),
            ));
        }
        self.ao_capture.lock().await.capture(checkpoint_index)
    }

    pub async fn ao_capture_complete(&self) -> bool {
        self.ao_capture.lock().await.all_captured()
    }

    /// DI-only: pulse the test PLC to exercise the contact, then read back
    /// through the target PLC for operator confirmation. The hard-point
    /// sweep already validated wiring; this is an operator-visible repeat
    /// at manual-test time per §4.5 point 4.
    pub async fn pulse_di(&self, test_plc: &dyn PlcGateway, test_address: &str, target_address: &str) -> AppResult<bool> {
        test_plc.write_digital(test_address, true).await?;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let observed = self.target_plc.read_digital(target_address).await?;
        test_plc.write_digital(test_address, false).await?;
        Ok(observed)
    }

    async fn maybe_fire_completed(&self, channel: &Channel) {
        let all_decided = channel
            .sub_tests
            .values()
            .all(|s| matches!(s, SubTestStatus::Passed | SubTestStatus::Skipped));
        let mut fired = self.completed_edge_fired.lock().await;
        if all_decided && !*fired {
            *fired = true;
            let _ = self.events.send(ManualEvent::TestCompleted { channel_id: self.channel_id.clone() });
        } else if !all_decided {
            *fired = false;
        }
    }
}

/// Tracks which channel currently owns the one live operator session, so
/// callers can enforce "only one manual test open at a time" without
/// threading a session handle through every call site.
#[derive(Default)]
pub struct ManualTestCoordinator {
    active: Mutex<HashMap<String, ()>>,
}

impl ManualTestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &self,
        state_manager: Arc<ChannelStateManager>,
        target_plc: Arc<dyn PlcGateway>,
        channel_id: &str,
    ) -> AppResult<ManualTestSession> {
        let mut active = self.active.lock().await;
        if active.contains_key(channel_id) {
            return Err(AppError::concurrency(channel_id, "manual_test_already_open"));
        }
        let session = ManualTestSession::open(state_manager, target_plc, channel_id).await?;
        active.insert(channel_id.to_string(), ());
        Ok(session)
    }

    pub async fn close(&self, channel_id: &str) {
        self.active.lock().await.remove(channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_bus::EventBus;
    use crate::domain::plc_gateway::MockPlcGateway;
    use crate::models::{HardPointResult, RawChannelImport, WireSystem};

    fn raw_di() -> RawChannelImport {
        RawChannelImport {
            test_id: 1,
            tag: "DI001".into(),
            description: "door switch".into(),
            module_type: ModuleType::DI,
            wire_system: WireSystem::NormallyOpen,
            target_address: "target_di".into(),
            test_address: "test_do".into(),
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
            batch_id: "b1".into(),
            test_tag: "tag1".into(),
        }
    }

    async fn passed_channel(mgr: &Arc<ChannelStateManager>) -> Channel {
        let channel = mgr.initialize_from_import(raw_di()).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();
        mgr.begin_hard_point_test(&channel.id).await.unwrap();
        mgr.record_hard_point_outcome(&channel.id, true, None).await.unwrap();
        mgr.get_channel(&channel.id).await.unwrap()
    }

    #[tokio::test]
    async fn opening_session_before_hard_point_passes_is_rejected() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let channel = mgr.initialize_from_import(raw_di()).await;
        let target_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("target_plc"));
        let err = ManualTestSession::open(mgr.clone(), target_plc, &channel.id).await.unwrap_err();
        assert!(matches!(err, AppError::Precondition { .. }));
    }

    #[tokio::test]
    async fn committing_only_applicable_sub_item_fires_completed_edge_once() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let channel = passed_channel(&mgr).await;
        assert_eq!(channel.hard_point_result, HardPointResult::Passed);
        let target_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("target_plc"));
        let session = ManualTestSession::open(mgr.clone(), target_plc, &channel.id).await.unwrap();
        let mut rx = session.subscribe();

        session.commit(SubTestItem::ShowValue, true, None).await.unwrap();
        let evt = rx.try_recv().unwrap();
        assert!(matches!(evt, ManualEvent::TestCompleted { .. }));
        // A second commit of an already-decided item must not refire.
        session.commit(SubTestItem::ShowValue, true, None).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn coordinator_rejects_a_second_concurrent_session_on_same_channel() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let channel = passed_channel(&mgr).await;
        let target_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("target_plc"));
        let coordinator = ManualTestCoordinator::new();
        let _first = coordinator.open(mgr.clone(), target_plc.clone(), &channel.id).await.unwrap();
        let err = coordinator.open(mgr.clone(), target_plc, &channel.id).await.unwrap_err();
        assert!(matches!(err, AppError::Concurrency { .. }));
    }

    #[tokio::test]
    async fn failing_a_sub_item_carries_the_operator_note_onto_the_channel() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let channel = passed_channel(&mgr).await;
        let target_plc: Arc<dyn PlcGateway> = Arc::new(MockPlcGateway::new("target_plc"));
        let session = ManualTestSession::open(mgr.clone(), target_plc, &channel.id).await.unwrap();

        let failed = session
            .commit(SubTestItem::ShowValue, false, Some("reading drifted off scale".into()))
            .await
            .unwrap();
        assert_eq!(
            failed.sub_test_failure_notes[&SubTestItem::ShowValue],
            "reading drifted off scale"
        );
    }

    #[tokio::test]
    async fn start_monitoring_publishes_formatted_values_keyed_by_the_supplied_map() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let channel = passed_channel(&mgr).await;
        let target_plc = Arc::new(MockPlcGateway::new("target_plc"));
        target_plc.seed_analog("target_di", 42.5).await;
        let target_plc: Arc<dyn PlcGateway> = target_plc;
        let session = ManualTestSession::open(mgr.clone(), target_plc, &channel.id).await.unwrap();
        let mut rx = session.subscribe();

        let mut key_map = HashMap::new();
        key_map.insert("target_di".to_string(), "current_value".to_string());
        session.start_monitoring(key_map).await;

        let evt = tokio::time::timeout(std::time::Duration::from_millis(800), rx.recv())
            .await
            .expect("monitoring tick did not fire in time")
            .unwrap();
        match evt {
            ManualEvent::ValuesUpdated { channel_id, values } => {
                assert_eq!(channel_id, channel.id);
                assert_eq!(values.get("current_value"), Some(&"42.5".to_string()));
            }
            other => panic!("expected ValuesUpdated, got {other:?}"),
        }

        session.stop_monitoring().await;
        session.stop_monitoring().await; // idempotent
    }

    #[tokio::test]
    async fn ao_confirm_pass_requires_all_five_checkpoints_captured() {
        let mut capture = AoCaptureState::default();
        assert!(!capture.all_captured());
        for i in 0..4 {
            capture.capture(i).unwrap();
        }
        assert!(!capture.all_captured());
        capture.capture(4).unwrap();
        assert!(capture.all_captured());
    }
}
