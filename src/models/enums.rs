//! Enumerations shared across the data model.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a channel's PLC point. The `*None` variants are
/// passive/reserved points — they still get a hard-point sweep (or not, for
/// the `_NONE` digital kinds) but only ever carry the display sub-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    AI,
    AO,
    DI,
    DO,
    AiNone,
    AoNone,
    DiNone,
    DoNone,
}

impl ModuleType {
    pub fn is_analog(self) -> bool {
        matches!(self, Self::AI | Self::AO | Self::AiNone | Self::AoNone)
    }

    pub fn is_input(self) -> bool {
        matches!(self, Self::AI | Self::DI | Self::AiNone | Self::DiNone)
    }

    /// `_NONE` variants are reserved/passive points: display-only, no alarms.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::AiNone | Self::AoNone | Self::DiNone | Self::DoNone)
    }
}

impl Display for ModuleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AI => "AI",
            Self::AO => "AO",
            Self::DI => "DI",
            Self::DO => "DO",
            Self::AiNone => "AI_NONE",
            Self::AoNone => "AO_NONE",
            Self::DiNone => "DI_NONE",
            Self::DoNone => "DO_NONE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ModuleType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AI" => Ok(Self::AI),
            "AO" => Ok(Self::AO),
            "DI" => Ok(Self::DI),
            "DO" => Ok(Self::DO),
            "AI_NONE" => Ok(Self::AiNone),
            "AO_NONE" => Ok(Self::AoNone),
            "DI_NONE" => Ok(Self::DiNone),
            "DO_NONE" => Ok(Self::DoNone),
            other => Err(format!("unknown module type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireSystem {
    NormallyOpen,
    NormallyClosed,
}

impl Default for WireSystem {
    fn default() -> Self {
        Self::NormallyOpen
    }
}

/// Hard-point sweep result, §3 / §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardPointResult {
    NotTested,
    Waiting,
    InProgress,
    Passed,
    Failed,
}

impl Default for HardPointResult {
    fn default() -> Self {
        Self::NotTested
    }
}

impl Display for HardPointResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotTested => "not_tested",
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status of a single manual sub-test item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubTestStatus {
    NotTested,
    Passed,
    Failed,
    Skipped,
}

impl Default for SubTestStatus {
    fn default() -> Self {
        Self::NotTested
    }
}

/// The manual sub-test items named in §3/§4.1's applicability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubTestItem {
    ShowValue,
    LowAlarm,
    LowLowAlarm,
    HighAlarm,
    HighHighAlarm,
    AlarmValueSet,
    Maintenance,
    TrendCheck,
    ReportCheck,
}

impl Display for SubTestItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShowValue => "show_value",
            Self::LowAlarm => "low_alarm",
            Self::LowLowAlarm => "low_low_alarm",
            Self::HighAlarm => "high_alarm",
            Self::HighHighAlarm => "high_high_alarm",
            Self::AlarmValueSet => "alarm_value_set",
            Self::Maintenance => "maintenance",
            Self::TrendCheck => "trend_check",
            Self::ReportCheck => "report_check",
        };
        write!(f, "{s}")
    }
}

/// A channel's overall status — always a pure function of hard-point result
/// plus applicable manual sub-items (invariant 1), never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    NotTested,
    InProgress,
    Passed,
    Failed,
    Skipped,
}

impl Default for OverallStatus {
    fn default() -> Self {
        Self::NotTested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    NotStarted,
    WiringConfirmed,
    Testing,
    Completed,
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}
