//! Directional neighbour slots of a mesh block.
//!
//! Every block carries [`NUM_SLOTS`] = 56 neighbour slots. Slots are grouped
//! per direction; faces own four slots, edges two, corners one, so that a
//! direction whose neighbour is one refinement level finer can name each of
//! the finer blocks touching it:
//!
//! | slots  | direction            |
//! |--------|----------------------|
//! | 0..8   | x1 faces (-, +)      |
//! | 8..16  | x2 faces (-, +)      |
//! | 16..24 | x1x2 edges           |
//! | 24..32 | x3 faces (-, +)      |
//! | 32..40 | x3x1 edges           |
//! | 40..48 | x2x3 edges           |
//! | 48..56 | corners              |
//!
//! A particle's position is reduced to one [`AxisCode`] per axis. The 27
//! possible codes index [`BASE_SLOTS`] directly, so every exterior code maps
//! to exactly one direction group.

use crate::topology::block::{BlockBounds, BlockId};

/// Number of neighbour slots per block.
pub const NUM_SLOTS: usize = 56;

/// Position of a coordinate relative to a block extent on one axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AxisCode {
    Below = 0,
    Within = 1,
    Above = 2,
}

impl AxisCode {
    /// `Within` includes both faces of the interval.
    #[inline]
    pub fn classify(x: f64, min: f64, max: f64) -> Self {
        if x < min {
            AxisCode::Below
        } else if x > max {
            AxisCode::Above
        } else {
            AxisCode::Within
        }
    }

    #[inline]
    pub fn classify_point(pos: [f64; 3], bounds: &BlockBounds) -> [AxisCode; 3] {
        [0, 1, 2].map(|a| Self::classify(pos[a], bounds.min[a], bounds.max[a]))
    }

    #[inline]
    pub fn offset(self) -> i8 {
        self as i8 - 1
    }
}

/// Base slot of each direction group, indexed by `c1 + 3*c2 + 9*c3` where
/// `ci` is the [`AxisCode`] of axis `i`. Index 13 is the interior.
pub const BASE_SLOTS: [Option<u8>; 27] = [
    // x3 below
    Some(48), Some(40), Some(49),
    Some(32), Some(24), Some(34),
    Some(50), Some(42), Some(51),
    // x3 within
    Some(16), Some(8), Some(18),
    Some(0), None, Some(4),
    Some(20), Some(12), Some(22),
    // x3 above
    Some(52), Some(44), Some(53),
    Some(36), Some(28), Some(38),
    Some(54), Some(46), Some(55),
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DirectionKind {
    Face,
    Edge,
    Corner,
}

/// One of the 26 non-interior directions around a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Direction {
    offset: [i8; 3],
    base_slot: u8,
}

impl Direction {
    /// Direction for a three-axis code; `None` for the interior.
    pub fn from_codes(codes: [AxisCode; 3]) -> Option<Self> {
        let idx = codes[0] as usize + 3 * codes[1] as usize + 9 * codes[2] as usize;
        BASE_SLOTS[idx].map(|base_slot| Direction {
            offset: codes.map(AxisCode::offset),
            base_slot,
        })
    }

    /// Direction for an offset in `{-1, 0, 1}^3`.
    pub fn from_offset(offset: [i8; 3]) -> Option<Self> {
        let mut codes = [AxisCode::Within; 3];
        for (code, &o) in codes.iter_mut().zip(offset.iter()) {
            *code = match o {
                -1 => AxisCode::Below,
                0 => AxisCode::Within,
                1 => AxisCode::Above,
                _ => return None,
            };
        }
        Self::from_codes(codes)
    }

    /// All 26 directions.
    pub fn all() -> impl Iterator<Item = Direction> {
        (0..27usize).filter_map(|i| {
            let code = |c: usize| match c {
                0 => AxisCode::Below,
                1 => AxisCode::Within,
                _ => AxisCode::Above,
            };
            Self::from_codes([code(i % 3), code((i / 3) % 3), code(i / 9)])
        })
    }

    pub fn offset(self) -> [i8; 3] {
        self.offset
    }

    pub fn base_slot(self) -> u8 {
        self.base_slot
    }

    pub fn kind(self) -> DirectionKind {
        match self.offset.iter().filter(|&&o| o != 0).count() {
            1 => DirectionKind::Face,
            2 => DirectionKind::Edge,
            _ => DirectionKind::Corner,
        }
    }

    /// Number of slots in this direction's group.
    pub fn width(self) -> u8 {
        match self.kind() {
            DirectionKind::Face => 4,
            DirectionKind::Edge => 2,
            DirectionKind::Corner => 1,
        }
    }

    /// Sub-slot of a finer neighbour: bit `k` is set when the position lies in
    /// the upper half of the block on the `k`-th tangential axis.
    pub fn sub_slot(self, pos: [f64; 3], bounds: &BlockBounds) -> u8 {
        (0..3)
            .filter(|&a| self.offset[a] == 0)
            .enumerate()
            .map(|(bit, a)| u8::from(pos[a] >= bounds.midpoint(a)) << bit)
            .sum()
    }
}

/// Neighbour block id and the rank that owns it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct NeighborBlock {
    pub gid: BlockId,
    pub rank: usize,
}

/// The 56 neighbour slots of one block. Empty slots have no neighbour
/// (a non-periodic mesh edge, or unused refinement sub-slots).
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborTable {
    slots: [Option<NeighborBlock>; NUM_SLOTS],
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborTable {
    pub fn new() -> Self {
        Self {
            slots: [None; NUM_SLOTS],
        }
    }

    /// Fill `slot`. Returns the previous occupant.
    ///
    /// # Panics
    /// Panics if `slot >= NUM_SLOTS`.
    pub fn set(&mut self, slot: usize, nb: NeighborBlock) -> Option<NeighborBlock> {
        self.slots[slot].replace(nb)
    }

    /// Fill the base slot of `dir`.
    pub fn set_direction(&mut self, dir: Direction, nb: NeighborBlock) -> Option<NeighborBlock> {
        self.set(dir.base_slot() as usize, nb)
    }

    pub fn get(&self, slot: usize) -> Option<NeighborBlock> {
        self.slots.get(slot).copied().flatten()
    }

    /// Populated slots as `(slot, neighbour)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, NeighborBlock)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|nb| (i, nb)))
    }

    /// Resolve the neighbour a particle at `pos` moves into when it leaves
    /// `bounds` through `dir`.
    ///
    /// Returns `Err(slot)` with the slot that was consulted when it is empty.
    pub fn resolve(
        &self,
        dir: Direction,
        pos: [f64; 3],
        bounds: &BlockBounds,
    ) -> Result<(u8, NeighborBlock), u8> {
        let base = dir.base_slot();
        let finer = (1..dir.width()).any(|k| self.slots[(base + k) as usize].is_some());
        let slot = if finer {
            base + dir.sub_slot(pos, bounds)
        } else {
            base
        };
        self.slots[slot as usize].map(|nb| (slot, nb)).ok_or(slot)
    }
}
