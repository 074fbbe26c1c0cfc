//! C2 — PLC Gateway.
//!
//! Narrow, synchronous-shaped (but `async`-over-the-wire) contract for one
//! analog/digital read or write against one endpoint. Two concrete
//! endpoints are bound by name elsewhere (`test_plc`, `target_plc`) — this
//! module only defines the capability set and a mock good enough to drive
//! the executor, coordinator and scheduler in tests and the demo binary.
//! A real Modbus/S7/OPC driver is an external collaborator (§1 non-goals)
//! that implements this same trait.
//!
//! Retries are deliberately not performed here — policy lives in callers
//! (the executor and the manual-test coordinator), per §4.2.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult, PlcErrorKind};

#[async_trait]
pub trait PlcGateway: Send + Sync {
    fn endpoint_name(&self) -> &str;
    fn is_connected(&self) -> bool;
    async fn connect(&self) -> AppResult<()>;
    async fn read_analog(&self, address: &str) -> AppResult<f32>;
    async fn write_analog(&self, address: &str, value: f32) -> AppResult<()>;
    async fn read_digital(&self, address: &str) -> AppResult<bool>;
    async fn write_digital(&self, address: &str, value: bool) -> AppResult<()>;
}

/// In-memory stand-in for a real transport driver. Holds one register map
/// per data kind; writes land directly in the map so a paired gateway
/// (stimulator wired to the same process) can be read back through
/// `inspect_analog`/`inspect_digital` by test code, or the mock can be
/// configured to echo a fixed fault rate to exercise the retry/escalation
/// paths in the executor.
pub struct MockPlcGateway {
    name: String,
    analog: RwLock<HashMap<String, f32>>,
    digital: RwLock<HashMap<String, bool>>,
    connected: AtomicBool,
    /// Fraction of calls (0.0–1.0) that fail with a transport error, to
    /// exercise the executor's retry-once-then-escalate policy.
    fault_rate: f64,
}

impl MockPlcGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            analog: RwLock::new(HashMap::new()),
            digital: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            fault_rate: 0.0,
        }
    }

    pub fn with_fault_rate(mut self, fault_rate: f64) -> Self {
        self.fault_rate = fault_rate;
        self
    }

    pub async fn inspect_analog(&self, address: &str) -> Option<f32> {
        self.analog.read().await.get(address).copied()
    }

    pub async fn inspect_digital(&self, address: &str) -> Option<bool> {
        self.digital.read().await.get(address).copied()
    }

    /// Pre-seed a value, e.g. to script what a read-back will return.
    pub async fn seed_analog(&self, address: &str, value: f32) {
        self.analog.write().await.insert(address.to_string(), value);
    }

    pub async fn seed_digital(&self, address: &str, value: bool) {
        self.digital.write().await.insert(address.to_string(), value);
    }

    fn maybe_fault(&self, address: &str) -> AppResult<()> {
        if self.fault_rate > 0.0 && rand::thread_rng().gen_bool(self.fault_rate) {
            return Err(AppError::plc(&self.name, address, PlcErrorKind::Transport, "simulated transport fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl PlcGateway for MockPlcGateway {
    fn endpoint_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> AppResult<()> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_analog(&self, address: &str) -> AppResult<f32> {
        self.maybe_fault(address)?;
        Ok(self.analog.read().await.get(address).copied().unwrap_or(0.0))
    }

    async fn write_analog(&self, address: &str, value: f32) -> AppResult<()> {
        self.maybe_fault(address)?;
        self.analog.write().await.insert(address.to_string(), value);
        Ok(())
    }

    async fn read_digital(&self, address: &str) -> AppResult<bool> {
        self.maybe_fault(address)?;
        Ok(self.digital.read().await.get(address).copied().unwrap_or(false))
    }

    async fn write_digital(&self, address: &str, value: bool) -> AppResult<()> {
        self.maybe_fault(address)?;
        self.digital.write().await.insert(address.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let gw = MockPlcGateway::new("test_plc");
        gw.write_analog("AO1", 42.5).await.unwrap();
        assert_eq!(gw.read_analog("AO1").await.unwrap(), 42.5);

        gw.write_digital("DO1", true).await.unwrap();
        assert!(gw.read_digital("DO1").await.unwrap());
    }

    #[tokio::test]
    async fn unwritten_address_reads_as_zero_value() {
        let gw = MockPlcGateway::new("target_plc");
        assert_eq!(gw.read_analog("unknown").await.unwrap(), 0.0);
        assert!(!gw.read_digital("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn full_fault_rate_always_errors() {
        let gw = MockPlcGateway::new("test_plc").with_fault_rate(1.0);
        let err = gw.read_analog("AO1").await.unwrap_err();
        assert!(err.is_retryable_transport());
    }
}
