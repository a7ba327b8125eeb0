//! Migration configuration.

use crate::algs::communicator::{CommTag, MigrationCommTags};
use crate::migrate_error::MigrateError;
use serde::{Deserialize, Serialize};

/// How the send list is ordered by destination rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPolicy {
    /// Entries bound for the same rank keep their staging order.
    #[default]
    Stable,
    /// Ties may reorder.
    Unstable,
}

/// What to do with a particle that left its block through a direction that
/// has no neighbour.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclassifiedPolicy {
    /// Keep the prior owner, log a warning, and count it in the report.
    #[default]
    Warn,
    /// Fail the ownership update.
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// First of the three consecutive tags a cycle uses.
    pub base_tag: u16,
    pub sort: SortPolicy,
    pub unclassified: UnclassifiedPolicy,
    /// Per-axis periodic wrap at the mesh boundary.
    pub periodic: [bool; 3],
    /// Particle count from which classification runs on the rayon pool.
    pub parallel_threshold: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            base_tag: 0x5000,
            sort: SortPolicy::Stable,
            unclassified: UnclassifiedPolicy::Warn,
            periodic: [true; 3],
            parallel_threshold: 1024,
        }
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<(), MigrateError> {
        if self.parallel_threshold == 0 {
            return Err(MigrateError::InvalidConfig(
                "parallel_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tags(&self) -> MigrationCommTags {
        MigrationCommTags::from_base(CommTag::new(self.base_tag))
    }
}
