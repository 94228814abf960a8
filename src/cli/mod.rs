//! CLI commands
//!
//! Offline commands of the `cq` binary. None of them talk to Gerrit.

mod config;
mod pending;
mod snapshot;
pub mod style;

pub use config::run_config;
pub use pending::run_pending;
pub use snapshot::run_snapshot;
