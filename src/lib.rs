#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-particles
//!
//! mesh-particles moves simulated particles between the ranks of a
//! block-decomposed mesh. Each rank owns a set of blocks; as particles move,
//! they are reassigned to the block that now contains them, and the ones whose
//! new block lives on another rank are shipped there with non-blocking
//! point-to-point messages.
//!
//! ## Features
//! - 56-slot directional neighbour tables with refinement sub-slots
//! - Data-parallel ownership classification (Rayon) with per-axis periodic wrap
//! - Send lists compressed into per-destination runs and exchanged with two
//!   all-gathers, so every rank knows its inbound plan before any payload moves
//! - Pluggable communication backends (serial, Rayon threads, MPI)
//! - An explicit cycle state machine: a phase cannot run before the one it
//!   depends on has settled
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-particles = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! ```rust
//! use mesh_particles::prelude::*;
//!
//! let grid = BlockGrid::new(BlockBounds::unit(), [2, 1, 1], [true; 3], 1)?;
//! let blocks = grid.local_blocks(0)?;
//! let mut store = ParticleStore::new();
//! store.push(Particle::new([0.55, 0.5, 0.5], [1.0, 0.0, 0.0], BlockId::new(0)));
//!
//! let comm = NoComm;
//! let mut cycle = MigrationCycle::new(&comm, MigrationConfig::default())?;
//! let summary = cycle.run(&mut store, &blocks)?;
//! assert_eq!(summary.relocated, 1);
//! assert_eq!(store.gids()[0], BlockId::new(1));
//! # Ok::<(), MigrateError>(())
//! ```
//!
//! ## Failure policy
//! Migration is fail-fast. A phase error leaves the cycle in
//! [`CycleState::Failed`](algs::migration::CycleState::Failed); drivers hand
//! the error to [`migrate_error::fatal`], which reports it on the logger and
//! stderr, then aborts.

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod migrate_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::migration::{CycleState, CycleSummary, MigrationCycle};
    pub use crate::config::{MigrationConfig, SortPolicy, UnclassifiedPolicy};
    pub use crate::data::particles::{Particle, ParticleStore};
    pub use crate::migrate_error::MigrateError;
    pub use crate::topology::block::{BlockBounds, BlockId, LocalBlocks};
    pub use crate::topology::grid::BlockGrid;
}
