//! `BlockId` and the per-rank view of the block decomposition.
//!
//! A mesh is split into blocks, each owned by one rank. This module holds
//! the geometry a rank needs to decide where its particles live:
//! - [`BlockId`], a strong handle for a mesh block.
//! - [`BlockBounds`], an axis-aligned box used for both blocks and the whole mesh.
//! - [`LocalBlocks`], the blocks owned by this rank with their neighbour tables.

use crate::migrate_error::MigrateError;
use crate::topology::neighbors::NeighborTable;
use std::fmt;

/// Identifier of a mesh block (the global id, or "gid").
///
/// # Memory layout
/// `repr(transparent)` over `u32`, so it travels on the wire as a plain
/// 32-bit integer.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        BlockId(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Offset of `self` from `first`, if `self >= first`.
    #[inline]
    pub fn checked_offset_from(self, first: BlockId) -> Option<usize> {
        self.0.checked_sub(first.0).map(|d| d as usize)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockId").field(&self.get()).finish()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Axis-aligned box `[min, max]` on each of the three axes.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// The global mesh extent has the same shape as a block extent.
pub type MeshBounds = BlockBounds;

impl BlockBounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Unit cube `[0, 1]^3`.
    pub fn unit() -> Self {
        Self::new([0.0; 3], [1.0; 3])
    }

    #[inline]
    pub fn length(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    #[inline]
    pub fn midpoint(&self, axis: usize) -> f64 {
        0.5 * (self.min[axis] + self.max[axis])
    }

    /// Closed containment test: a point exactly on a face is inside.
    pub fn contains(&self, pos: [f64; 3]) -> bool {
        (0..3).all(|a| pos[a] >= self.min[a] && pos[a] <= self.max[a])
    }

    /// True when `min < max` on every axis.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| self.min[a] < self.max[a])
    }
}

/// One block owned by this rank.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalBlock {
    pub bounds: BlockBounds,
    pub neighbors: NeighborTable,
}

/// Blocks owned by one rank, stored contiguously by gid starting at `first`.
///
/// This is the domain-decomposition input of a migration cycle and is treated
/// as immutable for the duration of a cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalBlocks {
    rank: usize,
    first: BlockId,
    blocks: Vec<LocalBlock>,
    mesh: MeshBounds,
}

impl LocalBlocks {
    pub fn new(
        rank: usize,
        first: BlockId,
        blocks: Vec<LocalBlock>,
        mesh: MeshBounds,
    ) -> Result<Self, MigrateError> {
        if !mesh.is_valid() {
            return Err(MigrateError::InvalidConfig(format!(
                "degenerate mesh bounds {mesh:?}"
            )));
        }
        if let Some(bad) = blocks.iter().position(|b| !b.bounds.is_valid()) {
            return Err(MigrateError::InvalidConfig(format!(
                "block {} has degenerate bounds",
                first.get() as usize + bad
            )));
        }
        Ok(Self {
            rank,
            first,
            blocks,
            mesh,
        })
    }

    /// Rank that owns these blocks.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn mesh_bounds(&self) -> &MeshBounds {
        &self.mesh
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, gid: BlockId) -> Option<&LocalBlock> {
        gid.checked_offset_from(self.first)
            .and_then(|m| self.blocks.get(m))
    }

    pub fn contains(&self, gid: BlockId) -> bool {
        self.get(gid).is_some()
    }

    /// Gids of the local blocks, ascending.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(move |m| BlockId::new(self.first.get() + m))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &LocalBlock)> + '_ {
        self.ids().zip(self.blocks.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(BlockId, u32);

    fn unit_block() -> LocalBlock {
        LocalBlock {
            bounds: BlockBounds::unit(),
            neighbors: NeighborTable::new(),
        }
    }

    #[test]
    fn lookup_by_gid_offset() {
        let blocks = LocalBlocks::new(
            1,
            BlockId::new(4),
            vec![unit_block(), unit_block()],
            BlockBounds::new([0.0; 3], [2.0, 1.0, 1.0]),
        )
        .unwrap();
        assert!(blocks.get(BlockId::new(3)).is_none());
        assert!(blocks.contains(BlockId::new(4)));
        assert!(blocks.contains(BlockId::new(5)));
        assert!(!blocks.contains(BlockId::new(6)));
        assert_eq!(
            blocks.ids().collect::<Vec<_>>(),
            vec![BlockId::new(4), BlockId::new(5)]
        );
    }

    #[test]
    fn degenerate_bounds_rejected() {
        let flat = LocalBlock {
            bounds: BlockBounds::new([0.0; 3], [1.0, 0.0, 1.0]),
            neighbors: NeighborTable::new(),
        };
        let err = LocalBlocks::new(0, BlockId::new(0), vec![flat], BlockBounds::unit());
        assert!(matches!(err, Err(MigrateError::InvalidConfig(_))));
    }

    #[test]
    fn faces_are_inside() {
        let b = BlockBounds::unit();
        assert!(b.contains([1.0, 0.0, 0.5]));
        assert!(!b.contains([1.0 + 1e-12, 0.5, 0.5]));
    }
}
