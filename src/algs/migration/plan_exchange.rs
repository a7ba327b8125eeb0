//! Stage 3 of migration: share every rank's run descriptors with every rank.
//!
//! Three phases, each depending on the one before, executed by all ranks in
//! lockstep:
//! 1. all-gather one count per rank (how many runs it has);
//! 2. prefix-sum those counts into displacements;
//! 3. variable-length all-gather of the run tuples into one table.
//!
//! The resulting [`GlobalSendTable`] is identical on every rank; filtering it
//! by destination gives a rank its complete receive plan.

use crate::algs::communicator::{Communicator, MigrationCommTags};
use crate::algs::migration::send_list::SendPlanTuple;
use crate::algs::wire::{WireCount, WireSendPlan, cast_slice, decode_records};
use crate::debug_invariants::DebugInvariants;
use crate::migrate_error::MigrateError;
use std::mem::size_of;

/// Concatenation of every rank's run tuples, in rank order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalSendTable {
    tuples: Vec<SendPlanTuple>,
    counts: Vec<usize>,
    displs: Vec<usize>,
}

impl GlobalSendTable {
    /// Assemble a table from per-rank tuple vectors (index = sending rank).
    pub fn from_rank_runs(per_rank: &[Vec<SendPlanTuple>]) -> Self {
        let counts: Vec<usize> = per_rank.iter().map(Vec::len).collect();
        let displs = prefix_sums(&counts);
        let tuples = per_rank.iter().flatten().copied().collect();
        Self {
            tuples,
            counts,
            displs,
        }
    }

    pub fn tuples(&self) -> &[SendPlanTuple] {
        &self.tuples
    }

    /// Number of ranks the table was gathered over.
    pub fn nranks(&self) -> usize {
        self.counts.len()
    }

    /// Runs posted by `rank`.
    pub fn sent_by(&self, rank: usize) -> &[SendPlanTuple] {
        match (self.displs.get(rank), self.counts.get(rank)) {
            (Some(&d), Some(&c)) => &self.tuples[d..d + c],
            _ => &[],
        }
    }

    /// Runs addressed to `rank`, in table order.
    pub fn inbound(&self, rank: usize) -> impl Iterator<Item = &SendPlanTuple> + '_ {
        self.tuples.iter().filter(move |t| t.dest_rank == rank)
    }

    /// Particles `rank` will receive.
    pub fn total_inbound(&self, rank: usize) -> usize {
        self.inbound(rank).map(|t| t.count).sum()
    }

    /// Particles `rank` will send.
    pub fn total_outbound(&self, rank: usize) -> usize {
        self.sent_by(rank).iter().map(|t| t.count).sum()
    }
}

impl DebugInvariants for GlobalSendTable {
    const LABEL: &'static str = "GlobalSendTable";

    fn validate_invariants(&self) -> Result<(), MigrateError> {
        let n = self.nranks();
        for src in 0..n {
            for t in self.sent_by(src) {
                if t.src_rank != src {
                    return Err(MigrateError::InvariantViolation(format!(
                        "tuple {t:?} sits in the block of rank {src}"
                    )));
                }
                if t.dest_rank >= n {
                    return Err(MigrateError::InvariantViolation(format!(
                        "tuple {t:?} addresses a rank outside 0..{n}"
                    )));
                }
            }
        }
        let laid_out: usize = self.counts.iter().sum();
        if laid_out != self.tuples.len() {
            return Err(MigrateError::InvariantViolation(format!(
                "counts describe {laid_out} tuples, table holds {}",
                self.tuples.len()
            )));
        }
        Ok(())
    }
}

fn prefix_sums(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

/// Gather every rank's runs. Collective: every rank must call this with its
/// own `runs`, and no rank returns before all have arrived.
pub fn exchange_plan<C>(
    comm: &C,
    runs: &[SendPlanTuple],
    tags: &MigrationCommTags,
) -> Result<GlobalSendTable, MigrateError>
where
    C: Communicator,
{
    let me = comm.rank();

    // 1) how many tuples does each rank have
    let mine = WireCount::new(runs.len())?;
    let raw = comm.all_gather(tags.counts.as_u16(), cast_slice(std::slice::from_ref(&mine)))?;
    let counts: Vec<usize> = decode_records::<WireCount>(me, &raw)?
        .iter()
        .map(WireCount::get)
        .collect();
    if counts.len() != comm.size() || counts[me] != runs.len() {
        return Err(MigrateError::CollectiveError {
            phase: "plan counts",
            source: format!(
                "gathered {} counts (own entry {:?}) for {} ranks",
                counts.len(),
                counts.get(me),
                comm.size()
            )
            .into(),
        });
    }

    // 2) displacements of each rank's block
    let displs = prefix_sums(&counts);
    log::trace!("rank {me}: run counts {counts:?}, displacements {displs:?}");

    // 3) the tuples themselves
    let wire: Vec<WireSendPlan> = runs
        .iter()
        .map(|t| WireSendPlan::new(t.src_rank, t.dest_rank, t.count))
        .collect::<Result<_, _>>()?;
    let byte_counts: Vec<usize> = counts.iter().map(|c| c * size_of::<WireSendPlan>()).collect();
    let raw = comm.all_gather_varcount(tags.plan.as_u16(), cast_slice(&wire), &byte_counts)?;
    let tuples: Vec<SendPlanTuple> = decode_records::<WireSendPlan>(me, &raw)?
        .iter()
        .map(|w| {
            let (src_rank, dest_rank, count) = w.decode();
            SendPlanTuple {
                src_rank,
                dest_rank,
                count,
            }
        })
        .collect();

    let table = GlobalSendTable {
        tuples,
        counts,
        displs,
    }
    .checked()?;
    log::debug!(
        "rank {me}: global table has {} runs; {} particles inbound",
        table.tuples.len(),
        table.total_inbound(me)
    );
    Ok(table)
}
