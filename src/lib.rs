//! Channel test orchestrator core: state machine, PLC gateway contract,
//! hard-point sweep executor, manual test coordinator, scheduler, batch
//! gate, record store and event bus for factory acceptance testing of
//! industrial I/O channels.

pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod models;

pub use commands::Orchestrator;
pub use error::{AppError, AppResult};
