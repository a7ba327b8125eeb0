//! Block decomposition seen by the migration core.
//!
//! - [`block`]: block ids, bounds, and the blocks a rank owns
//! - [`neighbors`]: the 56-slot directional neighbour table
//! - [`grid`]: a uniform decomposition that builds both for tests and drivers

pub mod block;
pub mod grid;
pub mod neighbors;

pub use block::{BlockBounds, BlockId, LocalBlock, LocalBlocks, MeshBounds};
pub use grid::BlockGrid;
pub use neighbors::{AxisCode, Direction, NeighborBlock, NeighborTable, NUM_SLOTS};
