//! Unified application error type.
//!
//! Every fallible operation in the orchestrator returns `AppResult<T>`.
//! Error kinds mirror the categories in the design's error-handling section:
//! transport failures from the two PLC endpoints, illegal state-transition
//! requests, sub-item applicability mismatches, hard-point tolerance
//! breaches, and concurrency conflicts — plus the ambient kinds every
//! service in this codebase carries (persistence, configuration,
//! validation, not-found, serialization).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of failure a PLC read/write surfaced, per the PLC Gateway
/// contract in the design (`transport`, `timeout`, `protocol`,
/// `value_out_of_range`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlcErrorKind {
    #[error("transport failure")]
    Transport,
    #[error("operation timed out")]
    Timeout,
    #[error("protocol violation")]
    Protocol,
    #[error("value out of range")]
    ValueOutOfRange,
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    /// PLC connect/read/write failure.
    #[error("PLC error on {endpoint} [{address}]: {kind} — {message}")]
    Plc {
        endpoint: String,
        address: String,
        kind: PlcErrorKind,
        message: String,
    },

    /// Requested state transition is not legal from the channel's current state.
    #[error("illegal transition for channel {channel_id}: {from} -> {op} ({reason})")]
    Precondition {
        channel_id: String,
        from: String,
        op: String,
        reason: String,
    },

    /// Sub-test item is not applicable to this channel's module type.
    #[error("{item} is not applicable to channel {channel_id} ({module_type})")]
    Applicability {
        channel_id: String,
        item: String,
        module_type: String,
    },

    /// Hard-point deviation exceeded the configured tolerance. Carried as
    /// part of a verdict, not raised as a control-flow error — exposed here
    /// only so callers that want to distinguish it from a transport fault
    /// can match on it.
    #[error("tolerance exceeded at checkpoint {checkpoint}: |{actual} - {expected}| / {expected} > {allowed_pct}%")]
    Tolerance {
        checkpoint: String,
        expected: f64,
        actual: f64,
        allowed_pct: f64,
    },

    /// The channel is already owned by another in-flight operation.
    #[error("channel {channel_id} is already {state}")]
    Concurrency { channel_id: String, state: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("not found: {resource_type} {id}")]
    NotFound { resource_type: String, id: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl AppError {
    pub fn plc(endpoint: impl Into<String>, address: impl Into<String>, kind: PlcErrorKind, message: impl Into<String>) -> Self {
        Self::Plc { endpoint: endpoint.into(), address: address.into(), kind, message: message.into() }
    }

    pub fn precondition(channel_id: impl Into<String>, from: impl Into<String>, op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Precondition { channel_id: channel_id.into(), from: from.into(), op: op.into(), reason: reason.into() }
    }

    pub fn applicability(channel_id: impl Into<String>, item: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self::Applicability { channel_id: channel_id.into(), item: item.into(), module_type: module_type.into() }
    }

    pub fn concurrency(channel_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::Concurrency { channel_id: channel_id.into(), state: state.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// True for transport-layer faults that are worth retrying once before
    /// they count against the two-consecutive-failures escalation rule.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, Self::Plc { kind: PlcErrorKind::Transport | PlcErrorKind::Timeout, .. })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization { message: e.to_string() }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Persistence { message: e.to_string() }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration { message: e.to_string() }
    }
}

pub type AppResult<T> = Result<T, AppError>;
