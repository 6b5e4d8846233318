//! Test components shared by the unit tests of every module.
mod common;
mod handlers;
mod stores;

pub use common::*;
pub use handlers::*;
pub use stores::*;
