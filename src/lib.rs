//! Multiplexed change-stream watch scheduler.
//!
//! Many independent consumers ([`Task`]s) share one change-feed cursor per
//! physical database. Each consumer keeps its own durable resume position in
//! a [`TokenStore`], so it can be stopped, restarted, or moved to another
//! process instance without losing or re-ordering events.

mod config;
mod errors;
mod leadership;
pub mod metrics;
mod scheduler;
mod source;
mod storage;
mod task;
mod types;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use leadership::*;
pub use scheduler::*;
pub use source::*;
pub use storage::*;
pub use task::*;
pub use types::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
