//! Uniform block decomposition of a rectangular mesh.
//!
//! [`BlockGrid`] splits the mesh into `n1 × n2 × n3` equal blocks, numbers
//! them x1-fastest, and hands contiguous gid ranges to ranks. It fills the
//! same-level neighbour slot of every direction, wrapping across periodic
//! axes and leaving slots empty at non-periodic mesh edges.

use crate::migrate_error::MigrateError;
use crate::topology::block::{BlockBounds, BlockId, LocalBlock, LocalBlocks, MeshBounds};
use crate::topology::neighbors::{Direction, NeighborBlock, NeighborTable};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockGrid {
    mesh: MeshBounds,
    nblocks: [usize; 3],
    periodic: [bool; 3],
    nranks: usize,
}

impl BlockGrid {
    pub fn new(
        mesh: MeshBounds,
        nblocks: [usize; 3],
        periodic: [bool; 3],
        nranks: usize,
    ) -> Result<Self, MigrateError> {
        if !mesh.is_valid() {
            return Err(MigrateError::InvalidConfig(format!(
                "degenerate mesh bounds {mesh:?}"
            )));
        }
        if nblocks.iter().any(|&n| n == 0) {
            return Err(MigrateError::InvalidConfig(format!(
                "block counts must be positive, got {nblocks:?}"
            )));
        }
        let total: usize = nblocks.iter().product();
        if nranks == 0 || nranks > total {
            return Err(MigrateError::InvalidConfig(format!(
                "cannot spread {total} blocks over {nranks} ranks"
            )));
        }
        if u32::try_from(total).is_err() {
            return Err(MigrateError::InvalidConfig(format!(
                "{total} blocks do not fit a 32-bit block id"
            )));
        }
        Ok(Self {
            mesh,
            nblocks,
            periodic,
            nranks,
        })
    }

    pub fn mesh_bounds(&self) -> &MeshBounds {
        &self.mesh
    }

    pub fn nranks(&self) -> usize {
        self.nranks
    }

    pub fn total_blocks(&self) -> usize {
        self.nblocks.iter().product()
    }

    /// First gid owned by `rank`.
    fn rank_start(&self, rank: usize) -> usize {
        rank * self.total_blocks() / self.nranks
    }

    /// Gids owned by `rank`.
    pub fn rank_range(&self, rank: usize) -> std::ops::Range<usize> {
        self.rank_start(rank)..self.rank_start(rank + 1)
    }

    pub fn owner(&self, gid: BlockId) -> usize {
        let g = gid.get() as usize;
        (0..self.nranks)
            .find(|&r| g < self.rank_start(r + 1))
            .unwrap_or(self.nranks - 1)
    }

    fn index_of(&self, gid: BlockId) -> [usize; 3] {
        let g = gid.get() as usize;
        let [n1, n2, _] = self.nblocks;
        [g % n1, (g / n1) % n2, g / (n1 * n2)]
    }

    fn gid_at(&self, idx: [usize; 3]) -> BlockId {
        let [n1, n2, _] = self.nblocks;
        BlockId::new((idx[0] + n1 * (idx[1] + n2 * idx[2])) as u32)
    }

    pub fn block_bounds(&self, gid: BlockId) -> BlockBounds {
        let idx = self.index_of(gid);
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for a in 0..3 {
            let d = self.mesh.length(a) / self.nblocks[a] as f64;
            min[a] = self.mesh.min[a] + d * idx[a] as f64;
            max[a] = if idx[a] + 1 == self.nblocks[a] {
                self.mesh.max[a]
            } else {
                self.mesh.min[a] + d * (idx[a] + 1) as f64
            };
        }
        BlockBounds::new(min, max)
    }

    /// Block whose extent contains `pos`, or `None` outside the mesh.
    pub fn block_containing(&self, pos: [f64; 3]) -> Option<BlockId> {
        if !self.mesh.contains(pos) {
            return None;
        }
        let mut idx = [0usize; 3];
        for a in 0..3 {
            let d = self.mesh.length(a) / self.nblocks[a] as f64;
            let i = ((pos[a] - self.mesh.min[a]) / d).floor() as usize;
            idx[a] = i.min(self.nblocks[a] - 1);
        }
        Some(self.gid_at(idx))
    }

    pub fn neighbors(&self, gid: BlockId) -> NeighborTable {
        let idx = self.index_of(gid);
        let mut table = NeighborTable::new();
        'dirs: for dir in Direction::all() {
            let mut at = [0usize; 3];
            for a in 0..3 {
                let n = self.nblocks[a] as isize;
                let mut i = idx[a] as isize + dir.offset()[a] as isize;
                if i < 0 || i >= n {
                    if !self.periodic[a] {
                        continue 'dirs;
                    }
                    i = i.rem_euclid(n);
                }
                at[a] = i as usize;
            }
            let ngid = self.gid_at(at);
            table.set_direction(
                dir,
                NeighborBlock {
                    gid: ngid,
                    rank: self.owner(ngid),
                },
            );
        }
        table
    }

    /// Blocks, bounds, and neighbour tables owned by `rank`.
    pub fn local_blocks(&self, rank: usize) -> Result<LocalBlocks, MigrateError> {
        if rank >= self.nranks {
            return Err(MigrateError::InvalidConfig(format!(
                "rank {rank} out of range for {} ranks",
                self.nranks
            )));
        }
        let range = self.rank_range(rank);
        let first = BlockId::new(range.start as u32);
        let blocks = range
            .map(|g| {
                let gid = BlockId::new(g as u32);
                LocalBlock {
                    bounds: self.block_bounds(gid),
                    neighbors: self.neighbors(gid),
                }
            })
            .collect();
        LocalBlocks::new(rank, first, blocks, self.mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(nblocks: [usize; 3], periodic: bool, nranks: usize) -> BlockGrid {
        BlockGrid::new(
            BlockBounds::new([0.0; 3], [nblocks[0] as f64, nblocks[1] as f64, nblocks[2] as f64]),
            nblocks,
            [periodic; 3],
            nranks,
        )
        .unwrap()
    }

    #[test]
    fn contiguous_rank_ranges() {
        let g = grid([4, 2, 1], true, 3);
        let owners: Vec<_> = (0..8).map(|i| g.owner(BlockId::new(i))).collect();
        assert_eq!(owners, vec![0, 0, 1, 1, 1, 2, 2, 2]);
        let covered: usize = (0..3).map(|r| g.rank_range(r).len()).sum();
        assert_eq!(covered, 8);
    }

    #[test]
    fn periodic_neighbors_wrap() {
        let g = grid([3, 1, 1], true, 1);
        let t = g.neighbors(BlockId::new(0));
        let west = Direction::from_offset([-1, 0, 0]).unwrap();
        let east = Direction::from_offset([1, 0, 0]).unwrap();
        assert_eq!(t.get(west.base_slot() as usize).unwrap().gid, BlockId::new(2));
        assert_eq!(t.get(east.base_slot() as usize).unwrap().gid, BlockId::new(1));
        // all 26 directions populated on a fully periodic grid
        assert_eq!(t.iter().count(), 26);
    }

    #[test]
    fn open_edges_leave_slots_empty() {
        let g = grid([2, 1, 1], false, 1);
        let t = g.neighbors(BlockId::new(0));
        assert_eq!(t.iter().count(), 1);
        assert_eq!(t.get(4).unwrap().gid, BlockId::new(1));
    }

    #[test]
    fn block_bounds_tile_mesh() {
        let g = grid([2, 2, 1], true, 2);
        let b3 = g.block_bounds(BlockId::new(3));
        assert_eq!(b3.min, [1.0, 1.0, 0.0]);
        assert_eq!(b3.max, [2.0, 2.0, 1.0]);
        assert_eq!(g.block_containing([1.5, 1.5, 0.5]), Some(BlockId::new(3)));
        assert_eq!(g.block_containing([2.0, 2.0, 1.0]), Some(BlockId::new(3)));
        assert_eq!(g.block_containing([2.5, 0.0, 0.0]), None);
    }

    #[test]
    fn rejects_more_ranks_than_blocks() {
        let err = BlockGrid::new(BlockBounds::unit(), [1, 1, 1], [true; 3], 2);
        assert!(matches!(err, Err(MigrateError::InvalidConfig(_))));
    }
}
