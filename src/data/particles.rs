//! Particle arrays owned by one rank.
//!
//! A particle has no stable identifier: its identity is its slot in the
//! arrays. Slots are compacted by swap removal, so indices handed out before
//! a removal are invalidated by it. [`ParticleStore::epoch`] changes whenever
//! the layout changes, which lets a migration cycle detect that its staged
//! indices went stale.

use crate::debug_invariants::DebugInvariants;
use crate::migrate_error::MigrateError;
use crate::topology::block::BlockId;
use std::collections::BTreeMap;

/// Value view of one particle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Particle {
    pub pos: [f64; 3],
    pub vel: [f64; 3],
    pub gid: BlockId,
}

impl Particle {
    pub fn new(pos: [f64; 3], vel: [f64; 3], gid: BlockId) -> Self {
        Self { pos, vel, gid }
    }
}

/// Structure-of-arrays particle storage with per-block counts.
#[derive(Clone, Debug, Default)]
pub struct ParticleStore {
    pos: Vec<[f64; 3]>,
    vel: Vec<[f64; 3]>,
    gid: Vec<BlockId>,
    block_counts: BTreeMap<BlockId, usize>,
    epoch: u64,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            pos: Vec::with_capacity(n),
            vel: Vec::with_capacity(n),
            gid: Vec::with_capacity(n),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.gid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gid.is_empty()
    }

    /// Layout generation; bumped by every push or removal.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn reserve(&mut self, additional: usize) {
        self.pos.reserve(additional);
        self.vel.reserve(additional);
        self.gid.reserve(additional);
    }

    /// Append a particle and return its slot.
    pub fn push(&mut self, p: Particle) -> usize {
        self.pos.push(p.pos);
        self.vel.push(p.vel);
        self.gid.push(p.gid);
        *self.block_counts.entry(p.gid).or_insert(0) += 1;
        self.epoch += 1;
        self.gid.len() - 1
    }

    pub fn get(&self, i: usize) -> Option<Particle> {
        Some(Particle {
            pos: *self.pos.get(i)?,
            vel: *self.vel.get(i)?,
            gid: *self.gid.get(i)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Particle> + '_ {
        self.pos
            .iter()
            .zip(&self.vel)
            .zip(&self.gid)
            .map(|((&pos, &vel), &gid)| Particle { pos, vel, gid })
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.pos
    }

    pub fn velocities(&self) -> &[[f64; 3]] {
        &self.vel
    }

    pub fn gids(&self) -> &[BlockId] {
        &self.gid
    }

    /// Mutable positions and ownership. Per-block counts are stale until
    /// [`recount_blocks`](Self::recount_blocks) is called.
    pub fn positions_and_gids_mut(&mut self) -> (&mut [[f64; 3]], &mut [BlockId]) {
        (&mut self.pos, &mut self.gid)
    }

    /// Remove the particles at `indices` (duplicates ignored), compacting by
    /// swap removal. Returns the number removed.
    pub fn remove_indices(&mut self, indices: &[usize]) -> Result<usize, MigrateError> {
        let mut order = indices.to_vec();
        order.sort_unstable_by(|a, b| b.cmp(a));
        order.dedup();
        if let Some(&top) = order.first() {
            if top >= self.len() {
                return Err(MigrateError::InvariantViolation(format!(
                    "cannot remove slot {top} from a store of {} particles",
                    self.len()
                )));
            }
        }
        // Descending order: every slot swapped into place comes from the
        // tail, which has already been visited.
        for &i in &order {
            self.pos.swap_remove(i);
            self.vel.swap_remove(i);
            let gid = self.gid.swap_remove(i);
            if let Some(c) = self.block_counts.get_mut(&gid) {
                *c = c.saturating_sub(1);
                if *c == 0 {
                    self.block_counts.remove(&gid);
                }
            }
        }
        if !order.is_empty() {
            self.epoch += 1;
        }
        Ok(order.len())
    }

    /// Rebuild per-block counts from the ownership array.
    pub fn recount_blocks(&mut self) {
        self.block_counts.clear();
        for &g in &self.gid {
            *self.block_counts.entry(g).or_insert(0) += 1;
        }
    }

    pub fn block_count(&self, gid: BlockId) -> usize {
        self.block_counts.get(&gid).copied().unwrap_or(0)
    }

    pub fn block_counts(&self) -> &BTreeMap<BlockId, usize> {
        &self.block_counts
    }
}

impl DebugInvariants for ParticleStore {
    const LABEL: &'static str = "ParticleStore";

    fn validate_invariants(&self) -> Result<(), MigrateError> {
        if self.pos.len() != self.gid.len() || self.vel.len() != self.gid.len() {
            return Err(MigrateError::InvariantViolation(format!(
                "column lengths differ: pos={}, vel={}, gid={}",
                self.pos.len(),
                self.vel.len(),
                self.gid.len()
            )));
        }
        let counted: usize = self.block_counts.values().sum();
        if counted != self.gid.len() {
            return Err(MigrateError::InvariantViolation(format!(
                "per-block counts sum to {counted}, store holds {}",
                self.gid.len()
            )));
        }
        Ok(())
    }
}
