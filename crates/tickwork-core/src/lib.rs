//! `tickwork-core`: configuration, duration strings and identifiers shared by
//! every tickwork crate.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{SchedulerConfig, TickworkConfig};
pub use error::{CoreError, Result};
pub use types::ExecutionId;
