//! Stage 1 of migration: reassign particles that crossed their block's boundary.
//!
//! Each particle's position is compared against its current block on the
//! three axes. An exterior code picks one direction group of the block's
//! neighbour table; the particle's ownership is overwritten with the
//! neighbour's gid, and if that neighbour lives on another rank the particle
//! is staged for sending. Periodic wrap is applied afterwards, per axis, from
//! the coordinates the classification saw.
//!
//! The kernel is data-parallel over particles. The only shared mutable state
//! is the staging counter, advanced with a single `fetch_add`.

use std::ops::Add;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::config::{MigrationConfig, UnclassifiedPolicy};
use crate::data::particles::ParticleStore;
use crate::migrate_error::MigrateError;
use crate::topology::block::{BlockId, LocalBlocks, MeshBounds};
use crate::topology::neighbors::{AxisCode, Direction};

/// One particle bound for another rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SendListEntry {
    /// Slot of the particle in the local store.
    pub particle: usize,
    pub dest_gid: BlockId,
    pub dest_rank: usize,
}

/// Pre-sized staging array filled concurrently through an atomic cursor.
pub struct StagingBuffer {
    slots: Box<[OnceLock<SendListEntry>]>,
    cursor: AtomicUsize,
}

impl StagingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reserve the next free slot and fill it. Returns the slot index.
    pub fn stage(&self, entry: SendListEntry) -> Result<usize, MigrateError> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        let slot = self.slots.get(i).ok_or(MigrateError::StagingOverflow {
            capacity: self.slots.len(),
        })?;
        slot.set(entry).map_err(|_| {
            MigrateError::InvariantViolation(format!("staging slot {i} filled twice"))
        })?;
        Ok(i)
    }

    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The staged entries, in slot order.
    pub fn into_entries(self) -> Vec<SendListEntry> {
        let n = self.len();
        self.slots
            .into_vec()
            .into_iter()
            .take(n)
            .filter_map(OnceLock::into_inner)
            .collect()
    }
}

/// Tallies of one ownership update.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GidUpdateReport {
    /// Particles whose ownership changed (same-rank and cross-rank).
    pub relocated: usize,
    /// Particles staged for another rank.
    pub staged: usize,
    /// Exterior particles whose direction slot was empty.
    pub unclassified: usize,
    /// Particles shifted by periodic wrap on at least one axis.
    pub wrapped: usize,
}

impl Add for GidUpdateReport {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            relocated: self.relocated + rhs.relocated,
            staged: self.staged + rhs.staged,
            unclassified: self.unclassified + rhs.unclassified,
            wrapped: self.wrapped + rhs.wrapped,
        }
    }
}

pub struct GidUpdater<'a> {
    blocks: &'a LocalBlocks,
    policy: UnclassifiedPolicy,
    periodic: [bool; 3],
    parallel_threshold: usize,
}

impl<'a> GidUpdater<'a> {
    pub fn new(blocks: &'a LocalBlocks, config: &MigrationConfig) -> Self {
        Self {
            blocks,
            policy: config.unclassified,
            periodic: config.periodic,
            parallel_threshold: config.parallel_threshold,
        }
    }

    /// Classify every particle in `store`, overwrite ownership, wrap
    /// positions, and return the staged cross-rank entries.
    ///
    /// Per-block counts in `store` are rebuilt before returning.
    pub fn update(
        &self,
        store: &mut ParticleStore,
    ) -> Result<(Vec<SendListEntry>, GidUpdateReport), MigrateError> {
        let staging = StagingBuffer::with_capacity(store.len());
        let n = store.len();
        let (pos, gid) = store.positions_and_gids_mut();

        let report = if n >= self.parallel_threshold {
            pos.par_iter_mut()
                .zip(gid.par_iter_mut())
                .enumerate()
                .map(|(p, (x, g))| self.update_one(p, x, g, &staging))
                .try_reduce(GidUpdateReport::default, |a, b| Ok(a + b))?
        } else {
            pos.iter_mut()
                .zip(gid.iter_mut())
                .enumerate()
                .try_fold(GidUpdateReport::default(), |acc, (p, (x, g))| {
                    Ok::<_, MigrateError>(acc + self.update_one(p, x, g, &staging)?)
                })?
        };
        store.recount_blocks();

        if report.staged != staging.len() {
            return Err(MigrateError::InvariantViolation(format!(
                "{} particles staged but staging cursor reads {}",
                report.staged,
                staging.len()
            )));
        }
        log::debug!(
            "rank {}: {} relocated, {} staged, {} unclassified, {} wrapped",
            self.blocks.rank(),
            report.relocated,
            report.staged,
            report.unclassified,
            report.wrapped
        );
        Ok((staging.into_entries(), report))
    }

    fn update_one(
        &self,
        p: usize,
        pos: &mut [f64; 3],
        gid: &mut BlockId,
        staging: &StagingBuffer,
    ) -> Result<GidUpdateReport, MigrateError> {
        let block = self.blocks.get(*gid).ok_or(MigrateError::ParticleNotLocal {
            particle: p,
            block: *gid,
        })?;
        let pre = *pos;
        let mut tally = GidUpdateReport::default();
        let mut kept_owner = false;

        if let Some(dir) = Direction::from_codes(AxisCode::classify_point(pre, &block.bounds)) {
            match block.neighbors.resolve(dir, pre, &block.bounds) {
                Ok((_, nb)) => {
                    *gid = nb.gid;
                    tally.relocated = 1;
                    if nb.rank != self.blocks.rank() {
                        staging.stage(SendListEntry {
                            particle: p,
                            dest_gid: nb.gid,
                            dest_rank: nb.rank,
                        })?;
                        tally.staged = 1;
                    }
                }
                Err(slot) => match self.policy {
                    UnclassifiedPolicy::Error => {
                        return Err(MigrateError::UnresolvedNeighbor {
                            particle: p,
                            block: *gid,
                            slot,
                        });
                    }
                    UnclassifiedPolicy::Warn => {
                        log::warn!(
                            "particle {p} left block {gid} through empty slot {slot}; ownership kept"
                        );
                        tally.unclassified = 1;
                        kept_owner = true;
                    }
                },
            }
        }

        // A particle that kept its owner stays where it is, even on an axis
        // configured periodic: the block it would wrap into does not own it.
        if !kept_owner && wrap_periodic(pre, pos, self.blocks.mesh_bounds(), self.periodic) {
            tally.wrapped = 1;
        }
        Ok(tally)
    }
}

/// Shift `pos` by one mesh length on every periodic axis where `pre` lies
/// outside the mesh. Returns whether anything moved.
pub fn wrap_periodic(
    pre: [f64; 3],
    pos: &mut [f64; 3],
    mesh: &MeshBounds,
    periodic: [bool; 3],
) -> bool {
    let mut moved = false;
    for a in (0..3).filter(|&a| periodic[a]) {
        if pre[a] < mesh.min[a] {
            pos[a] += mesh.length(a);
            moved = true;
        } else if pre[a] > mesh.max[a] {
            pos[a] -= mesh.length(a);
            moved = true;
        }
    }
    moved
}
