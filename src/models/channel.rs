//! The `Channel` entity — the central, long-lived-per-batch value the whole
//! orchestrator revolves around. See `domain::state_manager` for the only
//! component allowed to mutate it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{HardPointResult, ModuleType, OverallStatus, SubTestItem, SubTestStatus, WireSystem};

pub fn default_id() -> String {
    Uuid::new_v4().to_string()
}

/// Raw record as produced by channel allocation/import — out of scope per
/// §1, consumed here only through the shape it hands to
/// `initialize_from_import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChannelImport {
    pub test_id: u32,
    pub tag: String,
    pub description: String,
    pub module_type: ModuleType,
    pub wire_system: WireSystem,
    pub target_address: String,
    pub test_address: String,
    pub sll_setpoint_address: Option<String>,
    pub sl_setpoint_address: Option<String>,
    pub sh_setpoint_address: Option<String>,
    pub shh_setpoint_address: Option<String>,
    pub maintenance_enable_address: Option<String>,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
    pub lll: Option<f64>,
    pub ll: Option<f64>,
    pub h: Option<f64>,
    pub hh: Option<f64>,
    pub batch_id: String,
    pub test_tag: String,
}

/// One state transition, kept for diagnostics only (§"Supplemented
/// features" — never consulted when computing `overall_status`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default = "default_id")]
    pub id: String,
    pub test_id: u32,
    pub tag: String,
    pub description: String,

    pub module_type: ModuleType,
    pub wire_system: WireSystem,

    pub target_address: String,
    pub test_address: String,
    pub sll_setpoint_address: Option<String>,
    pub sl_setpoint_address: Option<String>,
    pub sh_setpoint_address: Option<String>,
    pub shh_setpoint_address: Option<String>,
    pub maintenance_enable_address: Option<String>,

    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
    pub lll: Option<f64>,
    pub ll: Option<f64>,
    pub h: Option<f64>,
    pub hh: Option<f64>,

    pub hard_point_result: HardPointResult,
    pub hard_point_error_detail: Option<String>,

    /// Only the sub-items applicable to this channel's module type appear
    /// here (invariant 4); items with a missing address are pre-seeded as
    /// `Skipped` at import time (invariants 5/6).
    pub sub_tests: HashMap<SubTestItem, SubTestStatus>,
    /// Human-readable reason recorded alongside an auto-skipped sub-item.
    pub skip_reasons: HashMap<SubTestItem, String>,
    /// Operator-entered rationale for a manually-failed sub-item (§7: "a
    /// failure always carries a human-readable reason"). Cleared if the
    /// item is later retried and passes.
    #[serde(default)]
    pub sub_test_failure_notes: HashMap<SubTestItem, String>,

    pub v0: Option<f64>,
    pub v25: Option<f64>,
    pub v50: Option<f64>,
    pub v75: Option<f64>,
    pub v100: Option<f64>,

    pub overall_status: OverallStatus,

    /// Set only by `mark_as_skipped`; once present the channel's overall
    /// status is pinned to `Skipped` regardless of hard-point/manual state
    /// (invariant 1's third input).
    pub skip_reason: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub final_time: Option<DateTime<Utc>>,

    pub batch_id: String,
    pub test_tag: String,

    #[serde(default)]
    pub history: Vec<StateChangeRecord>,
}

impl Channel {
    /// The manual sub-items that could ever apply to a channel of this
    /// module type, before accounting for missing addresses (invariant 4).
    pub fn applicable_sub_items(module_type: ModuleType) -> Vec<SubTestItem> {
        use SubTestItem::*;
        if module_type.is_reserved() {
            return vec![ShowValue];
        }
        match module_type {
            ModuleType::AI => vec![
                ShowValue, LowAlarm, LowLowAlarm, HighAlarm, HighHighAlarm,
                AlarmValueSet, Maintenance, TrendCheck, ReportCheck,
            ],
            ModuleType::AO => vec![ShowValue, TrendCheck, ReportCheck],
            ModuleType::DI | ModuleType::DO => vec![ShowValue],
            _ => vec![ShowValue],
        }
    }

    /// Whether this channel type requires a passed hard-point sweep before
    /// manual testing may begin (§4.1 `begin_manual_test`). `_NONE` types
    /// bypass the hard-point gate entirely.
    pub fn requires_hard_point_before_manual(&self) -> bool {
        !self.module_type.is_reserved()
    }

    pub fn record_history(&mut self, reason: impl Into<String>) {
        self.history.push(StateChangeRecord { timestamp: Utc::now(), reason: reason.into() });
        if self.history.len() > 20 {
            self.history.remove(0);
        }
    }
}
