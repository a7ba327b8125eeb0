//! Thin façade over intra-process (Rayon) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the transport calls
//! `.wait()` before it trusts that a buffer is ready or reusable.
//!
//! Besides point-to-point `isend`/`irecv`, a communicator exposes the two
//! collectives migration planning needs: a fixed-size and a variable-size
//! all-gather. The provided implementations build them from point-to-point
//! messages; the MPI backend overrides them with native collectives.

use crate::migrate_error::MigrateError;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn base(self) -> u16 {
        self.0
    }

    /// Tag `n` steps after this one, wrapping at `u16::MAX`.
    pub const fn offset(self, n: u16) -> Self {
        CommTag(self.0.wrapping_add(n))
    }
}

/// Tags used by one migration cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MigrationCommTags {
    /// Phase 1 of planning: per-rank run counts.
    pub counts: CommTag,
    /// Phase 3 of planning: the run tuples.
    pub plan: CommTag,
    /// Particle payloads. Every payload uses this one tag, so receives match
    /// on source rank alone.
    pub particles: CommTag,
}

impl MigrationCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            counts: base,
            plan: base.offset(1),
            particles: base.offset(2),
        }
    }
}

/// Non-blocking communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf`. The bytes are captured before this returns.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of `buf.len()` bytes; the data is delivered by `wait`.
    /// A message of any other length is delivered whole, never truncated.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn is_no_comm(&self) -> bool {
        false
    }

    fn barrier(&self) {}

    /// Gather `local` from every rank, concatenated in rank order.
    /// Every rank must contribute the same number of bytes.
    fn all_gather(&self, tag: u16, local: &[u8]) -> Result<Vec<u8>, MigrateError> {
        let counts = vec![local.len(); self.size()];
        self.all_gather_varcount(tag, local, &counts)
    }

    /// Gather `local` from every rank, where rank `r` contributes
    /// `byte_counts[r]` bytes. The result is laid out by prefix-sum
    /// displacement of `byte_counts`.
    fn all_gather_varcount(
        &self,
        tag: u16,
        local: &[u8],
        byte_counts: &[usize],
    ) -> Result<Vec<u8>, MigrateError> {
        let (me, size) = (self.rank(), self.size());
        let displs = displacements(byte_counts, size, me, local.len())?;
        let total: usize = byte_counts.iter().sum();
        let mut out = vec![0u8; total];
        out[displs[me]..displs[me] + local.len()].copy_from_slice(local);

        // 1) post all receives
        let mut pending_recvs = Vec::with_capacity(size.saturating_sub(1));
        for peer in (0..size).filter(|&p| p != me) {
            let (lo, hi) = (displs[peer], displs[peer] + byte_counts[peer]);
            let h = self.irecv(peer, tag, &mut out[lo..hi]);
            pending_recvs.push((peer, h));
        }

        // 2) post all sends
        let pending_sends: Vec<_> = (0..size)
            .filter(|&p| p != me)
            .map(|peer| self.isend(peer, tag, local))
            .collect();

        // 3) wait for all recvs (but do not early-return)
        let mut maybe_err = None;
        for (peer, h) in pending_recvs {
            let expected = byte_counts[peer];
            match h.wait() {
                Some(data) if data.len() == expected => {
                    out[displs[peer]..displs[peer] + expected].copy_from_slice(&data);
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MigrateError::WireLengthMismatch {
                        peer,
                        expected,
                        got: data.len(),
                    });
                }
                None if expected > 0 && maybe_err.is_none() => {
                    maybe_err = Some(MigrateError::CommError {
                        neighbor: peer,
                        source: format!("no collective contribution from rank {peer}").into(),
                    });
                }
                _ => {}
            }
        }

        // 4) always drain all send handles before returning
        for send in pending_sends {
            let _ = send.wait();
        }

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }
}

/// Prefix-sum displacements for `byte_counts`, after checking it matches the
/// communicator size and this rank's contribution.
fn displacements(
    byte_counts: &[usize],
    size: usize,
    me: usize,
    local_len: usize,
) -> Result<Vec<usize>, MigrateError> {
    if byte_counts.len() != size {
        return Err(MigrateError::CollectiveError {
            phase: "all_gather_varcount",
            source: format!("{} counts for {size} ranks", byte_counts.len()).into(),
        });
    }
    if byte_counts[me] != local_len {
        return Err(MigrateError::CollectiveError {
            phase: "all_gather_varcount",
            source: format!(
                "rank {me} contributes {local_len} bytes but {} were announced",
                byte_counts[me]
            )
            .into(),
        });
    }
    Ok(byte_counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect())
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for single-rank runs and serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Ranks as threads of one process, sharing a mailbox.
///
/// Messages between the same `(src, dst, tag)` are delivered in FIFO order.
/// Sends complete immediately; a receive spins in `wait` until its message
/// arrives, so every rank must run on its own thread.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// One communicator per rank of a fresh `size`-rank world.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Messages delivered but not yet received, across the whole world.
    pub fn in_flight(&self) -> usize {
        self.mailbox.iter().map(|q| q.value().len()).sum()
    }
}

pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl LocalHandle {
    fn try_take(&self) -> Option<Bytes> {
        self.mailbox.get_mut(&self.key)?.pop_front()
    }
}

impl Wait for LocalHandle {
    /// Returns the whole message. A length other than the posted receive
    /// size is left for the caller to reject.
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.try_take() {
                if bytes.len() != self.len {
                    log::trace!(
                        "message {:?} carries {} bytes for a {}-byte receive",
                        self.key,
                        bytes.len(),
                        self.len
                    );
                }
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, MigrateError, Wait, displacements};
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives, Destination, Source};

    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        size: usize,
        _universe: Option<Universe>,
    }

    impl MpiComm {
        /// Initialise MPI and wrap `MPI_COMM_WORLD`.
        pub fn new() -> Result<Self, MigrateError> {
            let universe = mpi::initialize().ok_or_else(|| MigrateError::CollectiveError {
                phase: "initialize",
                source: "MPI was already initialized".into(),
            })?;
            let world = universe.world();
            let mut comm = Self::from_world(world);
            comm._universe = Some(universe);
            Ok(comm)
        }

        /// Wrap a communicator whose universe the caller keeps alive.
        pub fn from_world(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world,
                rank,
                size,
                _universe: None,
            }
        }

        fn counts_i32(counts: &[usize]) -> Result<(Vec<i32>, Vec<i32>), MigrateError> {
            let to_i32 = |v: usize| {
                i32::try_from(v).map_err(|_| MigrateError::CollectiveError {
                    phase: "all_gather_varcount",
                    source: format!("{v} bytes exceeds an MPI count").into(),
                })
            };
            let mut displs = Vec::with_capacity(counts.len());
            let mut acc = 0usize;
            for &c in counts {
                displs.push(to_i32(acc)?);
                acc += c;
            }
            let counts = counts.iter().map(|&c| to_i32(c)).collect::<Result<_, _>>()?;
            Ok((counts, displs))
        }
    }

    /// A request together with the heap buffer it borrows.
    ///
    /// The buffer is leaked into a `'static` slice when the request is posted
    /// and reclaimed only after the request completes, so it can never be
    /// freed or resized while MPI still owns it.
    pub struct MpiHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
        deliver: bool,
    }

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::leak` in `isend`/`irecv` and the
            // only request borrowing it has completed above.
            let owned = unsafe { Box::from_raw(self.buf) };
            self.deliver.then(|| owned.into_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: `ptr` is live until `MpiHandle::wait` reclaims it.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                deliver: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: as in `isend`; MPI is the only writer until `wait`.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag as i32);
            MpiHandle {
                req: Some(req),
                buf: ptr,
                deliver: true,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn all_gather(&self, _tag: u16, local: &[u8]) -> Result<Vec<u8>, MigrateError> {
            let mut out = vec![0u8; local.len() * self.size];
            self.world.all_gather_into(local, &mut out[..]);
            Ok(out)
        }

        fn all_gather_varcount(
            &self,
            _tag: u16,
            local: &[u8],
            byte_counts: &[usize],
        ) -> Result<Vec<u8>, MigrateError> {
            displacements(byte_counts, self.size, self.rank, local.len())?;
            let (counts, displs) = Self::counts_i32(byte_counts)?;
            let mut out = vec![0u8; byte_counts.iter().sum()];
            {
                let mut partition = PartitionMut::new(&mut out[..], counts, &displs[..]);
                self.world.all_gather_varcount_into(local, &mut partition);
            }
            Ok(out)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiHandle};
