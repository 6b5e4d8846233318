//! Consumer descriptors and their per-database drain loops.

mod db_task;
mod handler;
#[allow(clippy::module_inception)]
mod task;
mod validator;

pub use db_task::*;
pub use handler::*;
pub use task::*;
pub use validator::*;
