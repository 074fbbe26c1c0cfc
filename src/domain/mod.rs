//! The nine orchestration components (C1–C9). Each submodule owns one
//! area of responsibility; `commands` (one level up) is the only thing
//! allowed to call across more than one of them in the same request.

pub mod batch_gate;
pub mod event_bus;
pub mod hard_point_executor;
pub mod manual_test_coordinator;
pub mod plc_gateway;
pub mod range_converter;
pub mod record_store;
pub mod scheduler;
pub mod state_manager;

pub use batch_gate::BatchGate;
pub use event_bus::{Event, EventBus};
pub use hard_point_executor::{HardPointExecutor, SuspensionToken, SweepVerdict};
pub use manual_test_coordinator::{ManualTestCoordinator, ManualTestSession};
pub use plc_gateway::{MockPlcGateway, PlcGateway};
pub use record_store::{RecordStore, SqliteRecordStore};
pub use scheduler::Scheduler;
pub use state_manager::ChannelStateManager;
