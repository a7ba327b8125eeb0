//! Re-export public algorithms.

pub mod communicator;
pub mod migration;
pub mod wire;

pub use migration::{MigrationCycle, CycleSummary};
