//! Watch scheduling: the registry, the per-database watchers and the
//! cold-start snapshot pump.

mod batch_buffer;
mod cold_start;
mod observer;
mod progress;
#[allow(clippy::module_inception)]
mod scheduler;
mod watcher;

pub use batch_buffer::*;
pub use cold_start::*;
pub use observer::*;
pub use progress::*;
pub use scheduler::*;
pub use watcher::*;
