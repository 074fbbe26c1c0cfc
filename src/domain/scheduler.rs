//! C6 — Scheduler.
//!
//! Runs hard-point sweeps across a batch with bounded concurrency, and is
//! the one place pause/resume/cancel fan out from (§4.6, §5). A channel
//! only ever has one sweep in flight at a time — `ChannelStateManager`'s own
//! `begin_hard_point_test` precondition would catch a double-run, but the
//! scheduler additionally tracks in-flight task handles so `cancel` can
//! reach a running sweep directly instead of waiting for the next
//! suspension-point poll.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::config::TestConfig;
use crate::domain::hard_point_executor::{HardPointExecutor, SuspensionToken};
use crate::domain::plc_gateway::PlcGateway;
use crate::domain::record_store::RecordStore;
use crate::domain::state_manager::ChannelStateManager;
use crate::error::AppResult;
use crate::models::ModuleType;

/// DI, DO, and the reserved `_NONE` variants resolve their overall verdict
/// from the hard-point sweep alone — §4.6 point 4's "self-terminal type".
fn is_self_terminal(module_type: ModuleType) -> bool {
    matches!(module_type, ModuleType::DI | ModuleType::DO) || module_type.is_reserved()
}

/// One channel's place in the scheduler's bookkeeping. The token is kept
/// around after completion so a stray late `cancel` call is a no-op rather
/// than a missing-key error.
struct RunningTask {
    token: SuspensionToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    state_manager: Arc<ChannelStateManager>,
    executor: Arc<HardPointExecutor>,
    record_store: Arc<dyn RecordStore>,
    semaphore: Arc<Semaphore>,
    running: Mutex<HashMap<String, RunningTask>>,
    global_pause: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    pub fn new(state_manager: Arc<ChannelStateManager>, record_store: Arc<dyn RecordStore>, config: TestConfig) -> Self {
        let max_parallel = config.max_parallel.max(1);
        Self {
            state_manager,
            executor: Arc::new(HardPointExecutor::new(config)),
            record_store,
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            running: Mutex::new(HashMap::new()),
            global_pause: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Queue a batch's channels for hard-point testing. Returns immediately;
    /// sweeps run in the background, bounded by the configured parallelism.
    /// Channels not currently `waiting` (per C1's `begin_hard_point_test`
    /// precondition) are skipped with a warning rather than aborting the
    /// whole batch.
    pub async fn start_batch(
        &self,
        channel_ids: Vec<String>,
        test_plc: Arc<dyn PlcGateway>,
        target_plc: Arc<dyn PlcGateway>,
    ) {
        for channel_id in channel_ids {
            self.start_channel(channel_id, test_plc.clone(), target_plc.clone()).await;
        }
    }

    pub async fn start_channel(&self, channel_id: String, test_plc: Arc<dyn PlcGateway>, target_plc: Arc<dyn PlcGateway>) {
        {
            let running = self.running.lock().await;
            if running.contains_key(&channel_id) {
                warn!("channel {channel_id} already has a sweep scheduled, ignoring duplicate start");
                return;
            }
        }

        let token = SuspensionToken::new();
        if self.global_pause.load(std::sync::atomic::Ordering::SeqCst) {
            token.pause();
        }

        let state_manager = self.state_manager.clone();
        let executor = self.executor.clone();
        let record_store = self.record_store.clone();
        let semaphore = self.semaphore.clone();
        let token_clone = token.clone();
        let id_for_task = channel_id.clone();

        let handle = tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            if let Err(e) = state_manager.begin_hard_point_test(&id_for_task).await {
                warn!("channel {id_for_task} not eligible to start: {e}");
                drop(permit);
                return;
            }

            let channel = match state_manager.get_channel(&id_for_task).await {
                Ok(c) => c,
                Err(e) => {
                    error!("channel {id_for_task} vanished mid-dispatch: {e}");
                    drop(permit);
                    return;
                }
            };

            let verdict = executor.run_sweep(&channel, test_plc, target_plc, &token_clone).await;
            drop(permit);

            match verdict {
                Ok(v) => {
                    info!("channel {id_for_task} hard-point sweep {}", if v.passed { "passed" } else { "failed" });
                    let passed = v.passed;
                    match state_manager.record_hard_point_outcome(&id_for_task, passed, v.detail).await {
                        Ok(updated) if passed && is_self_terminal(channel.module_type) => {
                            record_store.save_queued(updated).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("failed to record outcome for {id_for_task}: {e}");
                        }
                    }
                }
                Err(crate::error::AppError::Cancelled) => {
                    info!("channel {id_for_task} sweep cancelled");
                    if let Err(e) =
                        state_manager.record_hard_point_outcome(&id_for_task, false, Some("cancelled".into())).await
                    {
                        error!("failed to record cancellation outcome for {id_for_task}: {e}");
                    }
                }
                Err(e) => {
                    warn!("channel {id_for_task} sweep aborted: {e}");
                    let _ = state_manager.record_hard_point_outcome(&id_for_task, false, Some(e.to_string())).await;
                }
            }
        });

        self.running.lock().await.insert(channel_id, RunningTask { token, handle });
    }

    /// Pause every currently-running sweep at its next suspension point, and
    /// any sweep started after this call until `resume_all` is called.
    pub async fn pause_all(&self) {
        self.global_pause.store(true, std::sync::atomic::Ordering::SeqCst);
        for task in self.running.lock().await.values() {
            task.token.pause();
        }
    }

    pub async fn resume_all(&self) {
        self.global_pause.store(false, std::sync::atomic::Ordering::SeqCst);
        for task in self.running.lock().await.values() {
            task.token.resume();
        }
    }

    /// Cancel one channel's in-flight sweep, if any. A channel with no
    /// running sweep is a no-op.
    pub async fn cancel_channel(&self, channel_id: &str) {
        if let Some(task) = self.running.lock().await.get(channel_id) {
            task.token.cancel();
        }
    }

    pub async fn cancel_all(&self) {
        for task in self.running.lock().await.values() {
            task.token.cancel();
        }
    }

    /// Drop completed task handles so the running-set doesn't grow
    /// unboundedly across a long batch. Call periodically, or after
    /// `start_batch` returns for a fire-and-forget batch.
    pub async fn reap_finished(&self) {
        let mut running = self.running.lock().await;
        running.retain(|_, task| !task.handle.is_finished());
    }

    /// Reset a channel to `waiting` via C1 and re-dispatch it — the "retest"
    /// operation (§4.6 point 5).
    pub async fn retest_channel(
        &self,
        channel_id: &str,
        test_plc: Arc<dyn PlcGateway>,
        target_plc: Arc<dyn PlcGateway>,
    ) -> AppResult<()> {
        self.running.lock().await.remove(channel_id);
        self.state_manager.reset_for_retest(channel_id).await?;
        self.start_channel(channel_id.to_string(), test_plc, target_plc).await;
        Ok(())
    }

    pub async fn is_running(&self, channel_id: &str) -> bool {
        self.running.lock().await.contains_key(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_bus::EventBus;
    use crate::models::{HardPointResult, ModuleType, RawChannelImport, WireSystem};

    fn raw(test_id: u32) -> RawChannelImport {
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
            batch_id: "b1".into(),
            test_tag: "tag1".into(),
        }
    }

    async fn setup() -> (Arc<ChannelStateManager>, Scheduler) {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let mut config = TestConfig::default();
        config.settle_ms = 5;
        config.inter_checkpoint_ms = 5;
        config.reset_timeout_ms = 50;
        let record_store = crate::domain::record_store::SqliteRecordStore::connect(std::path::Path::new(":memory:"), 300)
            .await
            .unwrap();
        let scheduler = Scheduler::new(mgr.clone(), record_store, config);
        (mgr, scheduler)
    }

    #[tokio::test]
    async fn a_waiting_channel_reaches_a_terminal_hard_point_result() {
        let (mgr, scheduler) = setup().await;
        let channel = mgr.initialize_from_import(raw(1)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();

        let test_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("test_plc"));
        let target_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("target_plc"));
        scheduler.start_channel(channel.id.clone(), test_plc, target_plc).await;

        for _ in 0..50 {
            let after = mgr.get_channel(&channel.id).await.unwrap();
            if !matches!(after.hard_point_result, HardPointResult::InProgress) {
                assert!(matches!(after.hard_point_result, HardPointResult::Passed | HardPointResult::Failed));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("sweep never reached a terminal state");
    }

    #[tokio::test]
    async fn cancelling_a_channel_not_running_is_a_no_op() {
        let (_mgr, scheduler) = setup().await;
        scheduler.cancel_channel("nonexistent").await;
    }

    #[tokio::test]
    async fn duplicate_start_on_same_channel_is_ignored() {
        let (mgr, scheduler) = setup().await;
        let channel = mgr.initialize_from_import(raw(2)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();

        let test_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("test_plc"));
        let target_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("target_plc"));
        scheduler.start_channel(channel.id.clone(), test_plc.clone(), target_plc.clone()).await;
        scheduler.start_channel(channel.id.clone(), test_plc, target_plc).await;
        assert!(scheduler.is_running(&channel.id).await);
    }

    #[tokio::test]
    async fn a_cancelled_sweep_still_reaches_a_terminal_hard_point_result() {
        let (mgr, scheduler) = setup().await;
        let channel = mgr.initialize_from_import(raw(3)).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();

        let test_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("test_plc"));
        let target_plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("target_plc"));
        scheduler.start_channel(channel.id.clone(), test_plc, target_plc).await;
        scheduler.cancel_channel(&channel.id).await;

        for _ in 0..100 {
            let after = mgr.get_channel(&channel.id).await.unwrap();
            if !matches!(after.hard_point_result, HardPointResult::InProgress | HardPointResult::Waiting) {
                assert_eq!(after.hard_point_result, HardPointResult::Failed);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("cancelled sweep never reached a terminal hard-point result");
    }

    #[tokio::test]
    async fn a_self_terminal_channel_is_saved_once_its_hard_point_sweep_passes() {
        let mgr = Arc::new(ChannelStateManager::new(EventBus::new()));
        let mut config = TestConfig::default();
        config.settle_ms = 5;
        config.inter_checkpoint_ms = 5;
        config.reset_timeout_ms = 50;
        let record_store = crate::domain::record_store::SqliteRecordStore::connect(std::path::Path::new(":memory:"), 300)
            .await
            .unwrap();
        let scheduler = Scheduler::new(mgr.clone(), record_store.clone(), config);

        // Same stimulator/target address on a single shared gateway, so the
        // observer reads back exactly what the stimulator just wrote —
        // deterministically passes the DI polarity sweep.
        let mut import = raw(4);
        import.target_address = "shared_4".into();
        import.test_address = "shared_4".into();
        let channel = mgr.initialize_from_import(import).await;
        mgr.prepare_for_wiring_confirmation(&channel.id).await.unwrap();

        let plc: Arc<dyn PlcGateway> = Arc::new(crate::domain::plc_gateway::MockPlcGateway::new("plc"));
        scheduler.start_channel(channel.id.clone(), plc.clone(), plc).await;

        for _ in 0..50 {
            let after = mgr.get_channel(&channel.id).await.unwrap();
            if matches!(after.hard_point_result, HardPointResult::Passed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // Give the background save worker a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let restored = crate::domain::record_store::RecordStore::restore(record_store.as_ref(), "tag1").await.unwrap();
        assert!(restored.iter().any(|c| c.id == channel.id), "self-terminal DI channel should reach the record store on its own");
    }
}
