//! Target registry.
//!
//! SQLite storage for monitored targets and the monitoring interval, plus the
//! JSON export/import document.

mod models;
mod registry;
mod store;
mod transfer;

pub use models::*;
pub use registry::*;
pub use store::*;
pub use transfer::*;
