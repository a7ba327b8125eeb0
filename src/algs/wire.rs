//! Fixed, little-endian wire types for particle migration.
//!
//! Nothing is framed: a payload is `count × size_of::<Record>()` bytes and
//! the receiver relies on the count agreed during planning.

use crate::migrate_error::MigrateError;
use crate::topology::block::BlockId;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a byte blob into records, copying so that the blob's alignment
/// does not matter.
pub fn decode_records<T: Pod>(peer: usize, bytes: &[u8]) -> Result<Vec<T>, MigrateError> {
    let n = bytes.len() / size_of::<T>();
    expect_exact_len(peer, bytes.len(), n * size_of::<T>())?;
    Ok(bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Narrow a count or rank to the 32-bit wire width, refusing to truncate.
fn to_wire_u32(field: &str, v: usize) -> Result<u32, MigrateError> {
    u32::try_from(v).map_err(|_| {
        MigrateError::InvariantViolation(format!("{field} {v} does not fit a 32-bit wire field"))
    })
}

pub fn expect_exact_len(peer: usize, actual: usize, expected: usize) -> Result<(), MigrateError> {
    if actual == expected {
        Ok(())
    } else {
        Err(MigrateError::WireLengthMismatch {
            peer,
            expected,
            got: actual,
        })
    }
}

/// Count exchanged in phase 1 of planning.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Result<Self, MigrateError> {
        Ok(Self {
            n_le: to_wire_u32("count", n)?.to_le(),
        })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// `(src_rank, dest_rank, count)`: three 32-bit integers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireSendPlan {
    pub src_le: u32,
    pub dest_le: u32,
    pub count_le: u32,
}

impl WireSendPlan {
    pub const SIZE: usize = 12;

    pub fn new(src: usize, dest: usize, count: usize) -> Result<Self, MigrateError> {
        Ok(Self {
            src_le: to_wire_u32("source rank", src)?.to_le(),
            dest_le: to_wire_u32("destination rank", dest)?.to_le(),
            count_le: to_wire_u32("count", count)?.to_le(),
        })
    }
    pub fn decode(&self) -> (usize, usize, usize) {
        (
            u32::from_le(self.src_le) as usize,
            u32::from_le(self.dest_le) as usize,
            u32::from_le(self.count_le) as usize,
        )
    }
}

/// The only particle data that crosses the wire: destination block plus
/// position and velocity.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ParticleWireRecord {
    pub dest_gid_le: u32,
    pub _pad: u32, // keeps the f64 fields 8-byte aligned
    pub pos_le: [u64; 3],
    pub vel_le: [u64; 3],
}

impl ParticleWireRecord {
    pub const SIZE: usize = 56; // 4 + 4 + 6*8

    pub fn new(dest: BlockId, pos: [f64; 3], vel: [f64; 3]) -> Self {
        Self {
            dest_gid_le: dest.get().to_le(),
            _pad: 0,
            pos_le: pos.map(|x| x.to_bits().to_le()),
            vel_le: vel.map(|v| v.to_bits().to_le()),
        }
    }
    pub fn dest_gid(&self) -> BlockId {
        BlockId::new(u32::from_le(self.dest_gid_le))
    }
    pub fn pos(&self) -> [f64; 3] {
        self.pos_le.map(|b| f64::from_bits(u64::from_le(b)))
    }
    pub fn vel(&self) -> [f64; 3] {
        self.vel_le.map(|b| f64::from_bits(u64::from_le(b)))
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireSendPlan>() == WireSendPlan::SIZE);
    assert!(size_of::<ParticleWireRecord>() == ParticleWireRecord::SIZE);
    assert!(align_of::<ParticleWireRecord>() == 8);
};
