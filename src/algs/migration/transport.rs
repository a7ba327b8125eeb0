//! Stage 4 of migration: move particle payloads between ranks.
//!
//! The engine owns one receive buffer and one send buffer per cycle. Each
//! contiguous slice of a buffer is bound to exactly one outstanding request,
//! and neither buffer is reallocated while any of its requests is pending.
//! Completion is observed only at the two drain points,
//! [`wait_sends`](TransportEngine::wait_sends) and
//! [`wait_receives`](TransportEngine::wait_receives).

use std::ops::Range;

use bytemuck::Zeroable;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::migration::plan_exchange::GlobalSendTable;
use crate::algs::migration::send_list::SendPlan;
use crate::algs::wire::{ParticleWireRecord, cast_slice, cast_slice_mut};
use crate::data::particles::{Particle, ParticleStore};
use crate::migrate_error::MigrateError;
use crate::topology::block::LocalBlocks;

/// Slice of the receive buffer filled by one source rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundSlice {
    pub src_rank: usize,
    pub range: Range<usize>,
}

pub struct TransportEngine<'c, C: Communicator> {
    comm: &'c C,
    tag: CommTag,
    recv_buf: Vec<ParticleWireRecord>,
    recv_plan: Vec<InboundSlice>,
    recv_reqs: Vec<(usize, C::RecvHandle)>,
    recv_complete: bool,
    send_buf: Vec<ParticleWireRecord>,
    send_reqs: Vec<(usize, C::SendHandle)>,
}

impl<'c, C: Communicator> TransportEngine<'c, C> {
    pub fn new(comm: &'c C, tag: CommTag) -> Self {
        Self {
            comm,
            tag,
            recv_buf: Vec::new(),
            recv_plan: Vec::new(),
            recv_reqs: Vec::new(),
            recv_complete: false,
            send_buf: Vec::new(),
            send_reqs: Vec::new(),
        }
    }

    /// Outstanding requests (sends and receives).
    pub fn pending(&self) -> usize {
        self.send_reqs.len() + self.recv_reqs.len()
    }

    pub fn inbound_slices(&self) -> &[InboundSlice] {
        &self.recv_plan
    }

    /// Size the receive buffer from the table and post one receive per
    /// inbound run. Returns the number of particles expected.
    pub fn post_receives(&mut self, table: &GlobalSendTable) -> Result<usize, MigrateError> {
        if !self.recv_reqs.is_empty() {
            return Err(MigrateError::BuffersInFlight {
                pending: self.recv_reqs.len(),
            });
        }
        let me = self.comm.rank();
        let mut start = 0;
        self.recv_plan = table
            .inbound(me)
            .map(|t| {
                let range = start..start + t.count;
                start = range.end;
                InboundSlice {
                    src_rank: t.src_rank,
                    range,
                }
            })
            .collect();
        self.recv_buf = vec![ParticleWireRecord::zeroed(); start];
        self.recv_complete = false;

        for (i, slice) in self.recv_plan.iter().enumerate() {
            let bytes = cast_slice_mut(&mut self.recv_buf[slice.range.clone()]);
            log::trace!(
                "rank {me}: irecv {} bytes from rank {}",
                bytes.len(),
                slice.src_rank
            );
            let h = self.comm.irecv(slice.src_rank, self.tag.as_u16(), bytes);
            self.recv_reqs.push((i, h));
        }
        Ok(start)
    }

    /// Pack the staged particles in run order and post one send per run.
    /// Returns the number of particles sent.
    pub fn pack_and_send(
        &mut self,
        plan: &SendPlan,
        store: &ParticleStore,
    ) -> Result<usize, MigrateError> {
        if !self.send_reqs.is_empty() {
            return Err(MigrateError::BuffersInFlight {
                pending: self.send_reqs.len(),
            });
        }
        self.send_buf.clear();
        self.send_buf.reserve(plan.total());
        for e in plan.entries() {
            let p = store.get(e.particle).ok_or_else(|| {
                MigrateError::InvariantViolation(format!(
                    "staged particle {} missing from a store of {}",
                    e.particle,
                    store.len()
                ))
            })?;
            self.send_buf
                .push(ParticleWireRecord::new(e.dest_gid, p.pos, p.vel));
        }

        for (run, range) in plan.run_ranges() {
            let bytes = cast_slice(&self.send_buf[range]);
            log::trace!(
                "rank {}: isend {} bytes to rank {}",
                run.src_rank,
                bytes.len(),
                run.dest_rank
            );
            let h = self.comm.isend(run.dest_rank, self.tag.as_u16(), bytes);
            self.send_reqs.push((run.dest_rank, h));
        }
        Ok(self.send_buf.len())
    }

    /// Block until every posted send has completed; the send buffer is
    /// reusable afterwards. Returns the number of sends drained.
    ///
    /// A send handle carries no outcome: completion is the only signal. A
    /// backend whose send can fail must abort inside `wait` (MPI's default
    /// error handler does), so a send that returns here has been delivered
    /// to the transport.
    pub fn wait_sends(&mut self) -> usize {
        let n = self.send_reqs.len();
        for (dest, h) in self.send_reqs.drain(..) {
            if h.wait().is_some() {
                log::trace!("send to rank {dest} completed with a payload; ignored");
            }
        }
        n
    }

    /// Block until every posted receive has completed and copy the payloads
    /// into their slices. Every receive is drained even when one fails.
    pub fn wait_receives(&mut self) -> Result<usize, MigrateError> {
        let mut maybe_err = None;
        for (i, h) in std::mem::take(&mut self.recv_reqs) {
            let slice = &self.recv_plan[i];
            let dst = cast_slice_mut(&mut self.recv_buf[slice.range.clone()]);
            match h.wait() {
                Some(data) if data.len() == dst.len() => dst.copy_from_slice(&data),
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MigrateError::WireLengthMismatch {
                        peer: slice.src_rank,
                        expected: dst.len(),
                        got: data.len(),
                    });
                }
                None if !dst.is_empty() && maybe_err.is_none() => {
                    maybe_err = Some(MigrateError::CommError {
                        neighbor: slice.src_rank,
                        source: format!("no particle payload from rank {}", slice.src_rank)
                            .into(),
                    });
                }
                _ => {}
            }
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }
        self.recv_complete = true;
        Ok(self.recv_buf.len())
    }

    /// Received records; only available after [`wait_receives`](Self::wait_receives).
    pub fn received(&self) -> Result<&[ParticleWireRecord], MigrateError> {
        if !self.recv_reqs.is_empty() {
            return Err(MigrateError::BuffersInFlight {
                pending: self.recv_reqs.len(),
            });
        }
        if !self.recv_complete {
            return Err(MigrateError::InvariantViolation(
                "receive buffer read before its requests were waited".into(),
            ));
        }
        Ok(&self.recv_buf)
    }

    /// Append every received particle to `store`. All records are checked
    /// before any is appended, so a failure leaves the store untouched.
    pub fn unpack(
        &mut self,
        store: &mut ParticleStore,
        blocks: &LocalBlocks,
    ) -> Result<usize, MigrateError> {
        let received = self.received()?;
        let planned: usize = self.recv_plan.iter().map(|s| s.range.len()).sum();
        if planned != received.len() {
            return Err(MigrateError::ReceiveCountMismatch {
                expected: planned,
                got: received.len(),
            });
        }
        if let Some(bad) = received.iter().find(|r| !blocks.contains(r.dest_gid())) {
            return Err(MigrateError::ForeignDestination {
                block: bad.dest_gid(),
            });
        }
        store.reserve(received.len());
        for r in received {
            store.push(Particle::new(r.pos(), r.vel(), r.dest_gid()));
        }
        let n = received.len();
        self.recv_buf = Vec::new();
        self.recv_plan.clear();
        self.recv_complete = false;
        Ok(n)
    }
}

impl<C: Communicator> Drop for TransportEngine<'_, C> {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending > 0 {
            log::warn!("transport dropped with {pending} outstanding requests; draining");
            for (_, h) in self.send_reqs.drain(..) {
                let _ = h.wait();
            }
            for (_, h) in self.recv_reqs.drain(..) {
                let _ = h.wait();
            }
        }
    }
}
