//! C4 — Hard-Point Executor.
//!
//! Per-channel type-specific sweep: AI/AO walk the five percentage
//! checkpoints (0/25/50/75/100%), DI/DO walk the two polarities. One
//! executor, one `Recipe` per module type, rather than a class hierarchy —
//! the suspension/cancellation checks and the reset finalizer are shared
//! above the recipe dispatch (§4.4, "Design notes" re: deep class
//! hierarchies).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AoWriteMode, TestConfig};
use crate::domain::plc_gateway::PlcGateway;
use crate::domain::range_converter::{deviation_fraction, percent_to_real};
use crate::error::{AppError, AppResult};
use crate::models::{Channel, ModuleType};

/// Cooperative cancellation/pause handle shared by every task the
/// [`crate::domain::scheduler::Scheduler`] hands out. Checked at every
/// suspension point named in §5: before each write, each read, and each
/// settle/inter-checkpoint sleep.
#[derive(Clone, Default)]
pub struct SuspensionToken {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl SuspensionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Blocks cooperatively while paused, then raises `Cancelled` if a
    /// cancel arrived meanwhile.
    pub async fn check_and_wait_for_resume(&self) -> AppResult<()> {
        while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.check_cancelled()
    }

    pub fn check_cancelled(&self) -> AppResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn cancellable_sleep(&self, duration: Duration) -> AppResult<()> {
        let mut remaining = duration;
        let step = Duration::from_millis(50);
        while remaining > Duration::ZERO {
            self.check_and_wait_for_resume().await?;
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
        self.check_and_wait_for_resume().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointLogEntry {
    pub checkpoint: String,
    pub expected: f64,
    pub actual: f64,
    pub deviation_pct: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepVerdict {
    pub passed: bool,
    pub log: Vec<CheckpointLogEntry>,
    pub v0: Option<f64>,
    pub v25: Option<f64>,
    pub v50: Option<f64>,
    pub v75: Option<f64>,
    pub v100: Option<f64>,
    pub detail: Option<String>,
    /// Set when the post-sweep reset write failed — a diagnostic, never by
    /// itself a reason to flip `passed` unless `reset_failure_is_fatal`.
    pub reset_failure: Option<String>,
}

enum Recipe {
    Ai,
    Ao,
    Di,
    Do,
}

fn recipe_for(module_type: ModuleType) -> Option<Recipe> {
    match module_type {
        ModuleType::AI | ModuleType::AiNone => Some(Recipe::Ai),
        ModuleType::AO | ModuleType::AoNone => Some(Recipe::Ao),
        ModuleType::DI | ModuleType::DiNone => Some(Recipe::Di),
        ModuleType::DO | ModuleType::DoNone => Some(Recipe::Do),
    }
}

pub struct HardPointExecutor {
    config: TestConfig,
}

impl HardPointExecutor {
    pub fn new(config: TestConfig) -> Self {
        Self { config }
    }

    /// Read-with-one-retry, matching §4.2/§4.7's "retries live in the
    /// caller" policy and §7's "two consecutive failures on the same
    /// endpoint" escalation. Non-transport errors are not retried.
    async fn read_analog_retrying(&self, gw: &dyn PlcGateway, addr: &str) -> AppResult<f32> {
        match gw.read_analog(addr).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_retryable_transport() => {
                warn!("retrying analog read of {addr} on {} after: {e}", gw.endpoint_name());
                gw.read_analog(addr).await
            }
            Err(e) => Err(e),
        }
    }

    async fn write_analog_retrying(&self, gw: &dyn PlcGateway, addr: &str, value: f32) -> AppResult<()> {
        match gw.write_analog(addr, value).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable_transport() => {
                warn!("retrying analog write to {addr} on {} after: {e}", gw.endpoint_name());
                gw.write_analog(addr, value).await
            }
            Err(e) => Err(e),
        }
    }

    async fn read_digital_retrying(&self, gw: &dyn PlcGateway, addr: &str) -> AppResult<bool> {
        match gw.read_digital(addr).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_retryable_transport() => {
                warn!("retrying digital read of {addr} on {} after: {e}", gw.endpoint_name());
                gw.read_digital(addr).await
            }
            Err(e) => Err(e),
        }
    }

    async fn write_digital_retrying(&self, gw: &dyn PlcGateway, addr: &str, value: bool) -> AppResult<()> {
        match gw.write_digital(addr, value).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable_transport() => {
                warn!("retrying digital write to {addr} on {} after: {e}", gw.endpoint_name());
                gw.write_digital(addr, value).await
            }
            Err(e) => Err(e),
        }
    }

    /// Run the full sweep for `channel`. `test_plc` is the stimulator,
    /// `target_plc` is the device under test — which one is written to and
    /// which is read from flips between AI and AO (§4.4).
    pub async fn run_sweep(
        &self,
        channel: &Channel,
        test_plc: Arc<dyn PlcGateway>,
        target_plc: Arc<dyn PlcGateway>,
        token: &SuspensionToken,
    ) -> AppResult<SweepVerdict> {
        let recipe = recipe_for(channel.module_type)
            .ok_or_else(|| AppError::validation(format!("no recipe for module type {}", channel.module_type)))?;
        let result = match recipe {
            Recipe::Ai => self.run_analog(channel, &test_plc, &target_plc, token, self.config.ai_tolerance_pct, true).await,
            Recipe::Ao => self.run_analog(channel, &target_plc, &test_plc, token, self.config.ao_tolerance_pct, false).await,
            Recipe::Di => self.run_digital(channel, &test_plc, &target_plc, token, false).await,
            Recipe::Do => self.run_digital(channel, &target_plc, &test_plc, token, true).await,
        };
        result
    }

    /// Shared AI/AO sweep. `stimulator`/`observer` already resolved to the
    /// right endpoint for the direction; `is_ai` only affects which form
    /// (percent vs engineering) is written, per §4.3's "stimulate in
    /// percent, read in engineering units by default" and the
    /// `ao_write_mode` policy flag.
    #[allow(clippy::too_many_arguments)]
    async fn run_analog(
        &self,
        channel: &Channel,
        stimulator: &Arc<dyn PlcGateway>,
        observer: &Arc<dyn PlcGateway>,
        token: &SuspensionToken,
        tolerance_pct: f64,
        is_ai: bool,
    ) -> AppResult<SweepVerdict> {
        let lo = channel.range_low.unwrap_or(0.0);
        let hi = channel.range_high.unwrap_or(100.0);
        let stimulator_addr = if is_ai { &channel.test_address } else { &channel.target_address };
        let observer_addr = if is_ai { &channel.target_address } else { &channel.test_address };

        let checkpoints = [0.0, 25.0, 50.0, 75.0, 100.0];
        let mut log = Vec::with_capacity(checkpoints.len());
        let mut values = [None; 5];
        let mut consecutive_transport_failures = 0u32;
        let mut passed = true;
        let mut detail = None;
        let mut cancelled = false;

        for (idx, pct) in checkpoints.iter().enumerate() {
            if token.check_and_wait_for_resume().await.is_err() {
                cancelled = true;
                break;
            }
            let expected = percent_to_real(*pct, lo, hi);

            let write_value = if is_ai || matches!(self.config.ao_write_mode, AoWriteMode::Percent) {
                if is_ai { *pct as f32 } else { expected as f32 }
            } else {
                expected as f32
            };

            if token.check_and_wait_for_resume().await.is_err() {
                cancelled = true;
                break;
            }
            if let Err(e) = self.write_analog_retrying(stimulator.as_ref(), stimulator_addr, write_value).await {
                consecutive_transport_failures += 1;
                if consecutive_transport_failures >= 2 {
                    detail = Some(format!("aborting after repeated write failures at {pct}%: {e}"));
                    passed = false;
                    break;
                }
                log.push(CheckpointLogEntry {
                    checkpoint: format!("{pct}%"),
                    expected,
                    actual: f64::NAN,
                    deviation_pct: f64::NAN,
                    passed: false,
                });
                passed = false;
                continue;
            }
            consecutive_transport_failures = 0;

            if token.cancellable_sleep(Duration::from_millis(self.config.settle_ms)).await.is_err() {
                cancelled = true;
                break;
            }

            if token.check_and_wait_for_resume().await.is_err() {
                cancelled = true;
                break;
            }
            let actual = match self.read_analog_retrying(observer.as_ref(), observer_addr).await {
                Ok(v) => v as f64,
                Err(e) => {
                    consecutive_transport_failures += 1;
                    log.push(CheckpointLogEntry {
                        checkpoint: format!("{pct}%"),
                        expected,
                        actual: f64::NAN,
                        deviation_pct: f64::NAN,
                        passed: false,
                    });
                    passed = false;
                    if consecutive_transport_failures >= 2 {
                        detail = Some(format!("aborting after repeated read failures at {pct}%: {e}"));
                        break;
                    }
                    continue;
                }
            };
            consecutive_transport_failures = 0;
            values[idx] = Some(actual);

            let deviation = deviation_fraction(actual, expected) * 100.0;
            let checkpoint_passed = deviation <= tolerance_pct;
            if !checkpoint_passed {
                passed = false;
            }
            log.push(CheckpointLogEntry {
                checkpoint: format!("{pct}%"),
                expected,
                actual,
                deviation_pct: deviation,
                passed: checkpoint_passed,
            });
            info!("{} checkpoint {pct}%: expected {expected:.3}, actual {actual:.3}, deviation {deviation:.2}% ({})",
                channel.tag, if checkpoint_passed { "pass" } else { "fail" });

            if token.cancellable_sleep(Duration::from_millis(self.config.inter_checkpoint_ms)).await.is_err() {
                cancelled = true;
                break;
            }
        }

        // Reset is attempted regardless of how the loop above exited —
        // cancellation must never skip the best-effort reset write.
        let reset_failure = self.reset_best_effort(stimulator.as_ref(), stimulator_addr).await;
        if reset_failure.is_some() && self.config.reset_failure_is_fatal {
            passed = false;
        }

        if cancelled {
            return Err(AppError::Cancelled);
        }

        if detail.is_none() && !passed {
            let failed_checkpoints: Vec<&str> =
                log.iter().filter(|e| !e.passed).map(|e| e.checkpoint.as_str()).collect();
            detail = Some(format!("checkpoints out of tolerance: {}", failed_checkpoints.join(", ")));
        }

        Ok(SweepVerdict {
            passed,
            log,
            v0: values[0],
            v25: values[1],
            v50: values[2],
            v75: values[3],
            v100: values[4],
            detail,
            reset_failure,
        })
    }

    async fn reset_best_effort(&self, stimulator: &dyn PlcGateway, addr: &str) -> Option<String> {
        match tokio::time::timeout(
            Duration::from_millis(self.config.reset_timeout_ms),
            stimulator.write_analog(addr, 0.0),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("reset write failed: {e}")),
            Err(_) => Some("reset write timed out".to_string()),
        }
    }

    async fn digital_reset_best_effort(&self, stimulator: &dyn PlcGateway, addr: &str) -> Option<String> {
        match tokio::time::timeout(
            Duration::from_millis(self.config.reset_timeout_ms),
            stimulator.write_digital(addr, false),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("reset write failed: {e}")),
            Err(_) => Some("reset write timed out".to_string()),
        }
    }

    /// DI/DO polarity sweep: write true then false on the stimulator,
    /// reading the observer each time, applying the NC-invert policy flag
    /// when wiring calls for it (§9 open question, retained as config).
    async fn run_digital(
        &self,
        channel: &Channel,
        stimulator: &Arc<dyn PlcGateway>,
        observer: &Arc<dyn PlcGateway>,
        token: &SuspensionToken,
        target_stimulates: bool,
    ) -> AppResult<SweepVerdict> {
        let stimulator_addr = if target_stimulates { &channel.target_address } else { &channel.test_address };
        let observer_addr = if target_stimulates { &channel.test_address } else { &channel.target_address };

        let mut log = Vec::with_capacity(2);
        let mut passed = true;
        let mut detail = None;
        let mut cancelled = false;

        for expected in [true, false] {
            if token.check_and_wait_for_resume().await.is_err() {
                cancelled = true;
                break;
            }
            if let Err(e) = self.write_digital_retrying(stimulator.as_ref(), stimulator_addr, expected).await {
                passed = false;
                detail = Some(format!("write failed during write_{expected} checkpoint: {e}"));
                log.push(CheckpointLogEntry {
                    checkpoint: format!("write_{expected}"),
                    expected: expected as u8 as f64,
                    actual: f64::NAN,
                    deviation_pct: f64::NAN,
                    passed: false,
                });
                break;
            }
            if token.cancellable_sleep(Duration::from_millis(self.config.settle_ms)).await.is_err() {
                cancelled = true;
                break;
            }

            if token.check_and_wait_for_resume().await.is_err() {
                cancelled = true;
                break;
            }
            let mut observed = match self.read_digital_retrying(observer.as_ref(), observer_addr).await {
                Ok(v) => v,
                Err(e) => {
                    passed = false;
                    detail = Some(format!("read failed during write_{expected} checkpoint: {e}"));
                    log.push(CheckpointLogEntry {
                        checkpoint: format!("write_{expected}"),
                        expected: expected as u8 as f64,
                        actual: f64::NAN,
                        deviation_pct: f64::NAN,
                        passed: false,
                    });
                    break;
                }
            };
            if self.config.nc_wiring_inverts_read && matches!(channel.wire_system, crate::models::WireSystem::NormallyClosed) {
                observed = !observed;
            }

            let checkpoint_passed = observed == expected;
            if !checkpoint_passed {
                passed = false;
            }
            log.push(CheckpointLogEntry {
                checkpoint: format!("write_{expected}"),
                expected: expected as u8 as f64,
                actual: observed as u8 as f64,
                deviation_pct: if checkpoint_passed { 0.0 } else { 100.0 },
                passed: checkpoint_passed,
            });

            if token.cancellable_sleep(Duration::from_millis(self.config.inter_checkpoint_ms)).await.is_err() {
                cancelled = true;
                break;
            }
        }

        // Reset is attempted regardless of how the loop above exited —
        // cancellation or a transport error must never skip it.
        let reset_failure = self.digital_reset_best_effort(stimulator.as_ref(), stimulator_addr).await;
        if reset_failure.is_some() && self.config.reset_failure_is_fatal {
            passed = false;
        }

        if cancelled {
            return Err(AppError::Cancelled);
        }

        let detail = detail.or_else(|| {
            if passed { None } else { Some("polarity mismatch observed during DI/DO sweep".to_string()) }
        });

        Ok(SweepVerdict { passed, log, v0: None, v25: None, v50: None, v75: None, v100: None, detail, reset_failure })
    }
}
