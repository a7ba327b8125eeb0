//! Stage 2 of migration: order staged particles by destination rank and
//! compress them into per-destination runs.

use std::ops::Range;

use itertools::Itertools;

use crate::algs::migration::gid_update::SendListEntry;
use crate::config::SortPolicy;
use crate::debug_invariants::DebugInvariants;
use crate::migrate_error::MigrateError;

/// One contiguous run of the sorted send list: `count` particles from
/// `src_rank` to `dest_rank`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SendPlanTuple {
    pub src_rank: usize,
    pub dest_rank: usize,
    pub count: usize,
}

/// The sorted send list and its run descriptors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendPlan {
    entries: Vec<SendListEntry>,
    runs: Vec<SendPlanTuple>,
}

impl SendPlan {
    /// Sort `entries` by destination rank and emit one tuple per run, in the
    /// order the runs appear in the sorted list.
    pub fn build(my_rank: usize, mut entries: Vec<SendListEntry>, sort: SortPolicy) -> Self {
        match sort {
            SortPolicy::Stable => entries.sort_by_key(|e| e.dest_rank),
            SortPolicy::Unstable => entries.sort_unstable_by_key(|e| e.dest_rank),
        }
        let chunks = entries.iter().chunk_by(|e| e.dest_rank);
        let runs = (&chunks)
            .into_iter()
            .map(|(dest_rank, run)| SendPlanTuple {
                src_rank: my_rank,
                dest_rank,
                count: run.count(),
            })
            .collect();
        drop(chunks);
        Self { entries, runs }
    }

    /// Staged entries in send-buffer order.
    pub fn entries(&self) -> &[SendListEntry] {
        &self.entries
    }

    pub fn runs(&self) -> &[SendPlanTuple] {
        &self.runs
    }

    /// Number of particles leaving this rank.
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Each run with its slice of [`entries`](Self::entries), laid out by
    /// prefix sum of the run counts.
    pub fn run_ranges(&self) -> impl Iterator<Item = (&SendPlanTuple, Range<usize>)> + '_ {
        self.runs.iter().scan(0usize, |start, run| {
            let range = *start..*start + run.count;
            *start = range.end;
            Some((run, range))
        })
    }
}

impl DebugInvariants for SendPlan {
    const LABEL: &'static str = "SendPlan";

    fn validate_invariants(&self) -> Result<(), MigrateError> {
        let mut seen = std::collections::HashSet::new();
        let mut covered = 0;
        for (run, range) in self.run_ranges() {
            if run.count == 0 {
                return Err(MigrateError::InvariantViolation(format!(
                    "empty run to rank {}",
                    run.dest_rank
                )));
            }
            if run.dest_rank == run.src_rank {
                return Err(MigrateError::InvariantViolation(format!(
                    "run from rank {} to itself",
                    run.src_rank
                )));
            }
            if !seen.insert(run.dest_rank) {
                return Err(MigrateError::InvariantViolation(format!(
                    "rank {} appears in two runs",
                    run.dest_rank
                )));
            }
            let entries = self.entries.get(range.clone()).ok_or_else(|| {
                MigrateError::InvariantViolation(format!("run {range:?} past end of send list"))
            })?;
            if let Some(stray) = entries.iter().find(|e| e.dest_rank != run.dest_rank) {
                return Err(MigrateError::InvariantViolation(format!(
                    "particle {} bound for rank {} sits in the run for rank {}",
                    stray.particle, stray.dest_rank, run.dest_rank
                )));
            }
            covered = range.end;
        }
        if covered != self.entries.len() {
            return Err(MigrateError::InvariantViolation(format!(
                "runs cover {covered} of {} staged particles",
                self.entries.len()
            )));
        }
        Ok(())
    }
}
