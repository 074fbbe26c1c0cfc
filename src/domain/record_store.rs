//! C8 — Record Store.
//!
//! Durable snapshot of every channel that reaches a terminal `overall_status`,
//! backed by SQLite through `sea_orm`. `save_queued` is the path the
//! scheduler and manual-test coordinator call on every terminal transition;
//! it runs on a single background worker and collapses repeat saves of the
//! same channel within a short window (§4.8) rather than hitting the
//! database once per sub-item commit. `save_direct` is the synchronous path
//! used by explicit operator actions (export, retest) that need the write
//! to have landed before they return.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{ColumnDef, Table};
use sea_orm::{ActiveValue, ConnectionTrait, Database, DatabaseConnection};
use tokio::sync::{mpsc, Mutex};

use crate::error::{AppError, AppResult};
use crate::models::{Channel, TestRecord};

/// Narrow persistence contract the rest of the orchestrator depends on —
/// kept separate from `SqliteRecordStore` the same way `PlcGateway` is kept
/// separate from `MockPlcGateway`, so a future backend only needs to
/// implement this trait.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_queued(&self, channel: Channel);
    async fn save_direct(&self, channel: &Channel) -> AppResult<()>;
    async fn restore(&self, test_tag: &str) -> AppResult<Vec<Channel>>;
    async fn delete(&self, test_tag: &str) -> AppResult<()>;
    async fn list_batches(&self) -> AppResult<Vec<String>>;
}

pub mod entity {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "test_records")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub test_tag: String,
        pub channel_id: String,
        pub batch_id: String,
        pub saved_at: String,
        pub channel_json: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Entity as RecordEntity};

fn record_id(test_tag: &str, channel_id: &str) -> String {
    format!("{test_tag}::{channel_id}")
}

enum SaveJob {
    Queued(Channel),
}

pub struct SqliteRecordStore {
    db: DatabaseConnection,
    dedup_window: StdDuration,
    /// Per-channel: wall-clock time of the last enqueued save, and the
    /// `final_time` that save carried — dedup compares `final_time`, not
    /// elapsed wall-clock time, so a retest that reaches a genuinely new
    /// terminal state inside the window is never dropped (§4.8).
    last_saved: Mutex<HashMap<String, (DateTime<Utc>, Option<DateTime<Utc>>)>>,
    worker_tx: mpsc::UnboundedSender<SaveJob>,
}

impl SqliteRecordStore {
    pub async fn connect(database_path: &std::path::Path, dedup_window_secs: i64) -> AppResult<Arc<Self>> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let db = Database::connect(&url).await.map_err(AppError::from)?;
        Self::ensure_schema(&db).await?;

        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<SaveJob>();
        let store = Arc::new(Self {
            db,
            dedup_window: StdDuration::from_secs(dedup_window_secs.max(0) as u64),
            last_saved: Mutex::new(HashMap::new()),
            worker_tx,
        });

        let worker_store = store.clone();
        tokio::spawn(async move {
            while let Some(job) = worker_rx.recv().await {
                let SaveJob::Queued(channel) = job;
                if let Err(e) = worker_store.save_direct(&channel).await {
                    error!("queued save of channel {} failed: {e}", channel.id);
                }
            }
        });

        Ok(store)
    }

    async fn ensure_schema(db: &DatabaseConnection) -> AppResult<()> {
        let backend = db.get_database_backend();
        let stmt = Table::create()
            .table(entity::Entity.table_ref())
            .if_not_exists()
            .col(ColumnDef::new(entity::Column::Id).string().not_null().primary_key())
            .col(ColumnDef::new(entity::Column::TestTag).string().not_null())
            .col(ColumnDef::new(entity::Column::ChannelId).string().not_null())
            .col(ColumnDef::new(entity::Column::BatchId).string().not_null())
            .col(ColumnDef::new(entity::Column::SavedAt).string().not_null())
            .col(ColumnDef::new(entity::Column::ChannelJson).text().not_null())
            .to_owned();
        db.execute(backend.build(&stmt)).await.map_err(AppError::from)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    /// Enqueue a save, collapsing repeats of the *same terminal state* of
    /// the same channel within the configured dedup window — cheap to call
    /// from every terminal transition without worrying about write
    /// amplification. A channel that reaches a new `final_time` inside the
    /// window (e.g. a retest) is never suppressed, since the comparison is
    /// against the last saved `final_time`, not wall-clock elapsed time.
    async fn save_queued(&self, channel: Channel) {
        let now = Utc::now();
        {
            let mut last = self.last_saved.lock().await;
            if let Some((saved_at, prev_final_time)) = last.get(&channel.id) {
                let within_window =
                    now.signed_duration_since(*saved_at).num_milliseconds() < self.dedup_window.as_millis() as i64;
                if within_window && *prev_final_time == channel.final_time {
                    return;
                }
            }
            last.insert(channel.id.clone(), (now, channel.final_time));
        }

        if self.worker_tx.send(SaveJob::Queued(channel)).is_err() {
            warn!("record store worker has shut down, dropping queued save");
        }
    }

    /// Write immediately and wait for it to land — used by explicit
    /// operator-triggered saves (export, pre-retest snapshot).
    async fn save_direct(&self, channel: &Channel) -> AppResult<()> {
        let record = TestRecord::from_channel(channel);
        let json = serde_json::to_string(&record.channel)?;
        let active = ActiveModel {
            id: ActiveValue::Set(record_id(&record.test_tag, &record.channel_id)),
            test_tag: ActiveValue::Set(record.test_tag),
            channel_id: ActiveValue::Set(record.channel_id),
            batch_id: ActiveValue::Set(channel.batch_id.clone()),
            saved_at: ActiveValue::Set(record.saved_at.to_rfc3339()),
            channel_json: ActiveValue::Set(json),
        };
        RecordEntity::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(entity::Column::Id)
                    .update_columns([entity::Column::SavedAt, entity::Column::ChannelJson])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn restore(&self, test_tag: &str) -> AppResult<Vec<Channel>> {
        let rows = RecordEntity::find()
            .filter(entity::Column::TestTag.eq(test_tag))
            .all(&self.db)
            .await
            .map_err(AppError::from)?;
        rows.into_iter()
            .map(|row| serde_json::from_str::<Channel>(&row.channel_json).map_err(AppError::from))
            .collect()
    }

    async fn delete(&self, test_tag: &str) -> AppResult<()> {
        RecordEntity::delete_many()
            .filter(entity::Column::TestTag.eq(test_tag))
            .exec(&self.db)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn list_batches(&self) -> AppResult<Vec<String>> {
        let rows = RecordEntity::find().all(&self.db).await.map_err(AppError::from)?;
        let mut batches: Vec<String> = rows.into_iter().map(|r| r.batch_id).collect();
        batches.sort();
        batches.dedup();
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HardPointResult, ModuleType, OverallStatus, WireSystem};

    fn sample_channel(id: &str, test_tag: &str) -> Channel {
        Channel {
            id: id.to_string(),
            test_id: 1,
            tag: "AI001".into(),
            description: "desc".into(),
            module_type: ModuleType::AI,
            wire_system: WireSystem::NormallyOpen,
            target_address: "ta".into(),
            test_address: "tb".into(),
            sll_setpoint_address: None,
            sl_setpoint_address: None,
            sh_setpoint_address: None,
            shh_setpoint_address: None,
            maintenance_enable_address: None,
            range_low: Some(0.0),
            range_high: Some(100.0),
            lll: None,
            ll: None,
            h: None,
            hh: None,
            hard_point_result: HardPointResult::Passed,
            hard_point_error_detail: None,
            sub_tests: Default::default(),
            skip_reasons: Default::default(),
            sub_test_failure_notes: Default::default(),
            v0: Some(0.0),
            v25: Some(25.0),
            v50: Some(50.0),
            v75: Some(75.0),
            v100: Some(100.0),
            overall_status: OverallStatus::Passed,
            skip_reason: None,
            start_time: None,
            final_time: Some(Utc::now()),
            batch_id: "batch-1".into(),
            test_tag: test_tag.to_string(),
            history: Vec::new(),
        }
    }

    async fn in_memory_store() -> Arc<SqliteRecordStore> {
        SqliteRecordStore::connect(std::path::Path::new(":memory:"), 300).await.unwrap()
    }

    #[tokio::test]
    async fn save_direct_then_restore_round_trips_the_channel() {
        let store = in_memory_store().await;
        let channel = sample_channel("c1", "FAT-2026-07");
        store.save_direct(&channel).await.unwrap();

        let restored = store.restore("FAT-2026-07").await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, "c1");
        assert_eq!(restored[0].overall_status, OverallStatus::Passed);
    }

    #[tokio::test]
    async fn delete_removes_all_records_for_a_test_tag() {
        let store = in_memory_store().await;
        store.save_direct(&sample_channel("c1", "FAT-X")).await.unwrap();
        store.save_direct(&sample_channel("c2", "FAT-X")).await.unwrap();
        store.delete("FAT-X").await.unwrap();
        assert!(store.restore("FAT-X").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_queued_is_deduplicated_within_the_window() {
        let store = in_memory_store().await;
        let channel = sample_channel("c1", "FAT-Y");
        store.save_queued(channel.clone()).await;
        store.save_queued(channel).await;
        // Give the background worker a moment to drain; the second save
        // should have been suppressed by the dedup window so only one row.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let restored = store.restore("FAT-Y").await.unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[tokio::test]
    async fn a_new_final_time_inside_the_dedup_window_is_not_dropped() {
        let store = in_memory_store().await;
        let mut first = sample_channel("c1", "FAT-Z");
        first.final_time = Some(Utc::now());
        store.save_queued(first.clone()).await;

        // A retest reaching a new terminal final_time moments later, still
        // well inside the 300s dedup window — must not be suppressed.
        let mut retested = first.clone();
        retested.final_time = Some(Utc::now() + chrono::Duration::seconds(1));
        retested.overall_status = OverallStatus::Failed;
        store.save_queued(retested).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let restored = store.restore("FAT-Z").await.unwrap();
        assert_eq!(restored.len(), 1, "same (test_tag, channel_id) row, but it must reflect the newer save");
        assert_eq!(restored[0].overall_status, OverallStatus::Failed);
    }
}
