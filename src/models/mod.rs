//! Core data model: the entities every component reads or (for C1 alone)
//! writes.

pub mod batch;
pub mod channel;
pub mod enums;
pub mod record;

pub use batch::{Batch, BatchStatistics};
pub use channel::{default_id, Channel, RawChannelImport, StateChangeRecord};
pub use enums::{
    BatchStatus, HardPointResult, ModuleType, OverallStatus, SubTestItem, SubTestStatus,
    WireSystem,
};
pub use record::TestRecord;
