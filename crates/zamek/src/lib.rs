#[macro_use]
pub mod common;

pub mod allocation;
pub mod journal;
pub mod ledger;
mod matcher;
pub mod monitor;
pub mod pool;
mod preempt;
mod queue;

pub use crate::common::data_structures::{Map, Set};
pub use crate::common::ids::{AllocationId, ResourceId};
pub use crate::common::wrapped::WrappedRcRefCell;

pub type Error = crate::common::error::ZmError;
pub type Result<T> = std::result::Result<T, Error>;

// Priority: smaller number -> higher priority; 0 is the highest.
pub type Priority = u32;

pub const LOWEST_PRIORITY: Priority = 1000;
