//! Sync domain models and outcome types.

mod model;
mod report;
mod scheduler;

pub use model::*;
pub use report::*;
pub use scheduler::*;
