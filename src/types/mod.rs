//! Shared token, event, filter and option types.

mod event;
mod filter;
mod options;
mod token;

pub use event::*;
pub use filter::*;
pub use options::*;
pub use token::*;
