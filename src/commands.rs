//! Operator command surface (§6).
//!
//! Plain async functions on `Orchestrator` rather than framework-bound
//! command handlers — the GUI/CLI shell that would wire these up to a
//! transport is out of scope here; this is the facade such a shell would
//! call into. Every command is a thin composition of the nine components;
//! none of them reach into a `Channel`'s fields directly.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::domain::{
    BatchGate, ChannelStateManager, EventBus, ManualTestCoordinator, ManualTestSession, PlcGateway,
    RecordStore, Scheduler, SqliteRecordStore,
};
use crate::error::AppResult;
use crate::models::{Batch, Channel, RawChannelImport, SubTestItem, TestRecord};

pub struct Orchestrator {
    pub state_manager: Arc<ChannelStateManager>,
    pub batch_gate: Arc<BatchGate>,
    pub scheduler: Arc<Scheduler>,
    pub manual_coordinator: Arc<ManualTestCoordinator>,
    pub record_store: Arc<dyn RecordStore>,
    pub event_bus: EventBus,
    pub test_plc: Arc<dyn PlcGateway>,
    pub target_plc: Arc<dyn PlcGateway>,
}

impl Orchestrator {
    pub async fn new(
        config: &AppConfig,
        test_plc: Arc<dyn PlcGateway>,
        target_plc: Arc<dyn PlcGateway>,
    ) -> AppResult<Self> {
        let event_bus = EventBus::new();
        let state_manager = Arc::new(ChannelStateManager::new(event_bus.clone()));
        let batch_gate = Arc::new(BatchGate::new(state_manager.clone()));
        let record_store: Arc<dyn RecordStore> = SqliteRecordStore::connect(
            &config.persistence_config.database_path,
            config.persistence_config.dedup_window_secs,
        )
        .await?;
        let scheduler = Arc::new(Scheduler::new(state_manager.clone(), record_store.clone(), config.test_config.clone()));
        let manual_coordinator = Arc::new(ManualTestCoordinator::new());

        Ok(Self {
            state_manager,
            batch_gate,
            scheduler,
            manual_coordinator,
            record_store,
            event_bus,
            test_plc,
            target_plc,
        })
    }

    /// Register a batch's channels with C1 and the batch gate. Channel
    /// allocation (which physical PLC address maps to which tag) happens
    /// upstream of this call — these records already carry their addresses.
    pub async fn import_channels(
        &self,
        raws: Vec<RawChannelImport>,
        batch_name: impl Into<String>,
        station_names: Vec<String>,
    ) -> AppResult<Batch> {
        let batch_name = batch_name.into();
        let mut channel_ids = Vec::with_capacity(raws.len());
        for raw in raws {
            let channel = self.state_manager.initialize_from_import(raw).await;
            channel_ids.push(channel.id);
        }
        let batch = Batch::new(batch_name, channel_ids, station_names);
        self.batch_gate.register_batch(batch.clone()).await;
        Ok(batch)
    }

    pub async fn select_batch(&self, batch_name: &str) -> AppResult<Batch> {
        self.batch_gate.get_batch(batch_name).await
    }

    pub async fn confirm_wiring(&self, batch_name: &str) -> AppResult<Batch> {
        self.batch_gate.confirm_wiring(batch_name).await
    }

    pub async fn skip_modules(&self, channel_ids: &[String], reason: &str) -> AppResult<()> {
        self.batch_gate.skip_modules(channel_ids, reason).await?;
        for channel_id in channel_ids {
            let channel = self.state_manager.get_channel(channel_id).await?;
            self.record_store.save_queued(channel).await;
        }
        Ok(())
    }

    /// Start hard-point testing for a whole batch, then mark it `Testing`.
    pub async fn start_test(&self, batch_name: &str) -> AppResult<()> {
        let batch = self.batch_gate.get_batch(batch_name).await?;
        self.batch_gate.mark_testing(batch_name).await?;
        self.scheduler
            .start_batch(batch.channel_ids, self.test_plc.clone(), self.target_plc.clone())
            .await;
        Ok(())
    }

    pub async fn pause(&self) {
        self.scheduler.pause_all().await;
    }

    pub async fn resume(&self) {
        self.scheduler.resume_all().await;
    }

    pub async fn cancel(&self, channel_id: &str) {
        self.scheduler.cancel_channel(channel_id).await;
    }

    pub async fn cancel_batch(&self) {
        self.scheduler.cancel_all().await;
    }

    pub async fn retest(&self, channel_id: &str) -> AppResult<()> {
        self.scheduler.retest_channel(channel_id, self.test_plc.clone(), self.target_plc.clone()).await
    }

    pub async fn open_manual_test(&self, channel_id: &str) -> AppResult<ManualTestSession> {
        self.manual_coordinator.open(self.state_manager.clone(), self.target_plc.clone(), channel_id).await
    }

    pub async fn confirm_sub_item(&self, session: &ManualTestSession, item: SubTestItem) -> AppResult<Channel> {
        let channel = session.commit(item, true, None).await?;
        if matches!(
            channel.overall_status,
            crate::models::OverallStatus::Passed | crate::models::OverallStatus::Failed
        ) {
            self.record_store.save_queued(channel.clone()).await;
        }
        Ok(channel)
    }

    /// `note` is the operator's human-readable reason for the failure (§6,
    /// §7) — stored on the channel alongside the sub-item outcome.
    pub async fn fail_sub_item(
        &self,
        session: &ManualTestSession,
        item: SubTestItem,
        note: impl Into<String>,
    ) -> AppResult<Channel> {
        let channel = session.commit(item, false, Some(note.into())).await?;
        self.record_store.save_queued(channel.clone()).await;
        Ok(channel)
    }

    pub async fn close_manual_test(&self, channel_id: &str) {
        self.manual_coordinator.close(channel_id).await;
    }

    /// Force a durable snapshot of every channel in a batch, regardless of
    /// the dedup window — used before handing results to an external
    /// reporting tool (itself out of scope here).
    pub async fn export_results(&self, batch_name: &str) -> AppResult<Vec<TestRecord>> {
        let channels = self.state_manager.list_for_batch(batch_name).await;
        let mut records = Vec::with_capacity(channels.len());
        for channel in &channels {
            self.record_store.save_direct(channel).await?;
            records.push(TestRecord::from_channel(channel));
        }
        Ok(records)
    }

    pub async fn restore_batch(&self, test_tag: &str) -> AppResult<Vec<Channel>> {
        self.record_store.restore(test_tag).await
    }

    pub async fn delete_batch(&self, test_tag: &str) -> AppResult<()> {
        self.record_store.delete(test_tag).await
    }
}
