//! MigrateError: Unified error type for mesh-particles public APIs
//!
//! Every phase of a migration cycle returns `Result<_, MigrateError>`. The
//! protocol is fail-fast: a communication error leaves the cycle in a terminal
//! state, and drivers are expected to hand the error to [`fatal`].

use crate::topology::block::BlockId;
use thiserror::Error;

/// Unified error type for particle migration.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A point-to-point transfer with `neighbor` failed.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A collective did not complete on this rank.
    #[error("Collective `{phase}` failed: {source}")]
    CollectiveError {
        phase: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received byte slice did not have the length agreed during planning.
    #[error("Wire length mismatch from rank {peer}: expected {expected} bytes, got {got}")]
    WireLengthMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },
    /// Inbound particle count disagrees with the receive buffer.
    #[error("Receive count mismatch: planned {expected} particles, buffer holds {got}")]
    ReceiveCountMismatch { expected: usize, got: usize },
    /// A particle left its block through a direction with no neighbour.
    #[error("Particle {particle} in block {block} has no neighbour in slot {slot}")]
    UnresolvedNeighbor {
        particle: usize,
        block: BlockId,
        slot: u8,
    },
    /// A particle claims a block this rank does not own.
    #[error("Particle {particle} references block {block}, which is not local")]
    ParticleNotLocal { particle: usize, block: BlockId },
    /// An inbound record targets a block this rank does not own.
    #[error("Inbound particle targets block {block}, which is not local")]
    ForeignDestination { block: BlockId },
    /// More particles were staged than the staging buffer can hold.
    #[error("Staging buffer overflow (capacity {capacity})")]
    StagingOverflow { capacity: usize },
    /// A phase operation was called out of order.
    #[error("Cannot run `{op}` from state {from}")]
    InvalidTransition { from: &'static str, op: &'static str },
    /// Buffers cannot be reallocated while requests are outstanding.
    #[error("{pending} requests still reference the transfer buffers")]
    BuffersInFlight { pending: usize },
    /// The particle store changed layout between staging and sending.
    #[error("Particle store was resized during a migration cycle")]
    StoreModified,
    /// An internal invariant did not hold.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    /// Configuration rejected by [`MigrationConfig::validate`](crate::config::MigrationConfig::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MigrateError {
    /// True for errors raised by the transport or collectives.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            MigrateError::CommError { .. }
                | MigrateError::CollectiveError { .. }
                | MigrateError::WireLengthMismatch { .. }
                | MigrateError::ReceiveCountMismatch { .. }
        )
    }
}

fn fatal_message(err: &MigrateError) -> String {
    format!("fatal error in particle migration: {err}")
}

/// Report `err` and abort the process.
///
/// The diagnostic goes to the installed logger and to stderr, so it is not
/// lost when the driver never set up logging.
///
/// There is no retry and no partial salvage: a rank that cannot finish its
/// part of a cycle would stall every other rank at the next collective.
pub fn fatal(err: &MigrateError) -> ! {
    let msg = fatal_message(err);
    log::error!("{msg}");
    eprintln!("{msg}");
    std::process::abort()
}
