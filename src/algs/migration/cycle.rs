//! One migration cycle as an explicit state machine.
//!
//! ```text
//! Idle -> GidsUpdated -> PlanExchanged -> ReceivesPosted -> SendsPosted
//!      -> SendsCleared -> ReceivesCleared -> Idle
//! ```
//!
//! Each phase operation checks that the cycle is in the state its predecessor
//! leaves behind, and settles its own work before returning. Calling a phase
//! out of order returns [`MigrateError::InvalidTransition`] without touching
//! the cycle. Any other error moves the cycle to [`CycleState::Failed`], from
//! which no phase can run; the caller is expected to pass the error to
//! [`fatal`](crate::migrate_error::fatal).

use crate::algs::communicator::{Communicator, MigrationCommTags};
use crate::algs::migration::gid_update::{GidUpdateReport, GidUpdater, SendListEntry};
use crate::algs::migration::plan_exchange::{GlobalSendTable, exchange_plan};
use crate::algs::migration::send_list::SendPlan;
use crate::algs::migration::transport::TransportEngine;
use crate::config::MigrationConfig;
use crate::data::particles::ParticleStore;
use crate::debug_invariants::DebugInvariants;
use crate::migrate_error::MigrateError;
use crate::topology::block::LocalBlocks;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    GidsUpdated,
    PlanExchanged,
    ReceivesPosted,
    SendsPosted,
    SendsCleared,
    ReceivesCleared,
    /// Terminal; entered on any phase error.
    Failed,
}

impl CycleState {
    pub const fn name(self) -> &'static str {
        match self {
            CycleState::Idle => "Idle",
            CycleState::GidsUpdated => "GidsUpdated",
            CycleState::PlanExchanged => "PlanExchanged",
            CycleState::ReceivesPosted => "ReceivesPosted",
            CycleState::SendsPosted => "SendsPosted",
            CycleState::SendsCleared => "SendsCleared",
            CycleState::ReceivesCleared => "ReceivesCleared",
            CycleState::Failed => "Failed",
        }
    }
}

/// What one completed cycle did on this rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Particles whose owning block changed.
    pub relocated: usize,
    /// Particles staged for another rank.
    pub staged: usize,
    /// Exterior particles left with their prior owner.
    pub unclassified: usize,
    /// Particles removed from the store after their sends completed.
    pub sent: usize,
    /// Particles appended to the store from other ranks.
    pub received: usize,
}

impl From<GidUpdateReport> for CycleSummary {
    fn from(r: GidUpdateReport) -> Self {
        Self {
            relocated: r.relocated,
            staged: r.staged,
            unclassified: r.unclassified,
            ..Self::default()
        }
    }
}

pub struct MigrationCycle<'c, C: Communicator> {
    comm: &'c C,
    config: MigrationConfig,
    tags: MigrationCommTags,
    state: CycleState,
    staged: Vec<SendListEntry>,
    plan: SendPlan,
    table: GlobalSendTable,
    transport: TransportEngine<'c, C>,
    store_epoch: u64,
    summary: CycleSummary,
}

impl<'c, C: Communicator> MigrationCycle<'c, C> {
    pub fn new(comm: &'c C, config: MigrationConfig) -> Result<Self, MigrateError> {
        config.validate()?;
        let tags = config.tags();
        Ok(Self {
            comm,
            config,
            tags,
            state: CycleState::Idle,
            staged: Vec::new(),
            plan: SendPlan::default(),
            table: GlobalSendTable::default(),
            transport: TransportEngine::new(comm, tags.particles),
            store_epoch: 0,
            summary: CycleSummary::default(),
        })
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Send plan of the current cycle (empty before `build_plan`).
    pub fn plan(&self) -> &SendPlan {
        &self.plan
    }

    /// Global table of the current cycle (empty before `build_plan`).
    pub fn table(&self) -> &GlobalSendTable {
        &self.table
    }

    /// Tallies accumulated so far in the current cycle.
    pub fn summary(&self) -> CycleSummary {
        self.summary
    }

    fn expect_state(&self, expected: CycleState, op: &'static str) -> Result<(), MigrateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MigrateError::InvalidTransition {
                from: self.state.name(),
                op,
            })
        }
    }

    /// Record the outcome of a phase: advance on success, fail otherwise.
    fn settle<T>(
        &mut self,
        next: CycleState,
        res: Result<T, MigrateError>,
    ) -> Result<T, MigrateError> {
        match res {
            Ok(v) => {
                log::trace!(
                    "rank {}: {} -> {}",
                    self.comm.rank(),
                    self.state.name(),
                    next.name()
                );
                self.state = next;
                Ok(v)
            }
            Err(e) => {
                log::error!(
                    "rank {}: migration failed in state {}: {e}",
                    self.comm.rank(),
                    self.state.name()
                );
                self.state = CycleState::Failed;
                Err(e)
            }
        }
    }

    fn check_epoch(&self, store: &ParticleStore) -> Result<(), MigrateError> {
        if store.epoch() == self.store_epoch {
            Ok(())
        } else {
            Err(MigrateError::StoreModified)
        }
    }

    /// Phase 1: classify particles and stage the ones leaving this rank.
    pub fn update_ownership(
        &mut self,
        store: &mut ParticleStore,
        blocks: &LocalBlocks,
    ) -> Result<GidUpdateReport, MigrateError> {
        self.expect_state(CycleState::Idle, "update_ownership")?;
        let res = if blocks.rank() != self.comm.rank() {
            Err(MigrateError::InvariantViolation(format!(
                "blocks of rank {} handed to rank {}",
                blocks.rank(),
                self.comm.rank()
            )))
        } else {
            GidUpdater::new(blocks, &self.config).update(store)
        };
        let (staged, report) = self.settle(CycleState::GidsUpdated, res)?;
        self.staged = staged;
        self.store_epoch = store.epoch();
        self.summary = report.into();
        Ok(report)
    }

    /// Phase 2: sort the staged particles into runs and exchange the runs
    /// with every rank. Collective.
    pub fn build_plan(&mut self) -> Result<&GlobalSendTable, MigrateError> {
        self.expect_state(CycleState::GidsUpdated, "build_plan")?;
        let plan = SendPlan::build(
            self.comm.rank(),
            std::mem::take(&mut self.staged),
            self.config.sort,
        );
        plan.debug_assert_invariants();
        log::debug!(
            "rank {}: {} particles outbound in {} runs",
            self.comm.rank(),
            plan.total(),
            plan.runs().len()
        );
        let res = exchange_plan(self.comm, plan.runs(), &self.tags);
        self.plan = plan;
        self.table = self.settle(CycleState::PlanExchanged, res)?;
        Ok(&self.table)
    }

    /// Phase 3: post one receive per inbound run. Returns the number of
    /// particles expected.
    pub fn post_receives(&mut self) -> Result<usize, MigrateError> {
        self.expect_state(CycleState::PlanExchanged, "post_receives")?;
        let res = self.transport.post_receives(&self.table);
        self.settle(CycleState::ReceivesPosted, res)
    }

    /// Phase 4: pack the outbound particles and post one send per run.
    pub fn pack_and_send(&mut self, store: &ParticleStore) -> Result<usize, MigrateError> {
        self.expect_state(CycleState::ReceivesPosted, "pack_and_send")?;
        let res = self
            .check_epoch(store)
            .and_then(|()| self.transport.pack_and_send(&self.plan, store));
        self.settle(CycleState::SendsPosted, res)
    }

    /// Phase 5: wait for every send, then drop the sent particles from
    /// `store`. Returns the number removed.
    pub fn clear_sends(&mut self, store: &mut ParticleStore) -> Result<usize, MigrateError> {
        self.expect_state(CycleState::SendsPosted, "clear_sends")?;
        let drained = self.transport.wait_sends();
        log::trace!("rank {}: {drained} sends complete", self.comm.rank());
        let res = self.check_epoch(store).and_then(|()| {
            let sent: Vec<usize> = self.plan.entries().iter().map(|e| e.particle).collect();
            store.remove_indices(&sent)
        });
        let sent = self.settle(CycleState::SendsCleared, res)?;
        self.summary.sent = sent;
        Ok(sent)
    }

    /// Phase 6: wait for every receive, append the arrivals to `store`, and
    /// return to `Idle`.
    pub fn clear_receives(
        &mut self,
        store: &mut ParticleStore,
        blocks: &LocalBlocks,
    ) -> Result<CycleSummary, MigrateError> {
        self.expect_state(CycleState::SendsCleared, "clear_receives")?;
        let res = self
            .transport
            .wait_receives()
            .and_then(|_| self.transport.unpack(store, blocks));
        let received = self.settle(CycleState::ReceivesCleared, res)?;
        self.summary.received = received;
        store.debug_assert_invariants();

        let summary = self.summary;
        log::debug!("rank {}: cycle complete: {summary:?}", self.comm.rank());
        self.plan = SendPlan::default();
        self.table = GlobalSendTable::default();
        self.state = CycleState::Idle;
        Ok(summary)
    }

    /// All six phases in order.
    pub fn run(
        &mut self,
        store: &mut ParticleStore,
        blocks: &LocalBlocks,
    ) -> Result<CycleSummary, MigrateError> {
        self.update_ownership(store, blocks)?;
        self.build_plan()?;
        self.post_receives()?;
        self.pack_and_send(store)?;
        self.clear_sends(store)?;
        self.clear_receives(store, blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::particles::Particle;
    use crate::topology::block::{BlockBounds, BlockId};
    use crate::topology::grid::BlockGrid;

    fn single_rank() -> LocalBlocks {
        BlockGrid::new(BlockBounds::unit(), [2, 2, 1], [true; 3], 1)
            .unwrap()
            .local_blocks(0)
            .unwrap()
    }

    #[test]
    fn phases_must_run_in_order() {
        let comm = NoComm;
        let mut cycle = MigrationCycle::new(&comm, MigrationConfig::default()).unwrap();
        let err = cycle.post_receives().unwrap_err();
        assert!(matches!(
            err,
            MigrateError::InvalidTransition { from: "Idle", op: "post_receives" }
        ));
        assert_eq!(cycle.state(), CycleState::Idle);
    }

    #[test]
    fn single_rank_cycle_relocates_locally() {
        let comm = NoComm;
        let blocks = single_rank();
        let mut store = ParticleStore::new();
        store.push(Particle::new([0.6, 0.2, 0.5], [1.0, 0.0, 0.0], BlockId::new(0)));
        store.push(Particle::new([0.2, 0.2, 0.5], [0.0; 3], BlockId::new(0)));

        let mut cycle = MigrationCycle::new(&comm, MigrationConfig::default()).unwrap();
        let summary = cycle.run(&mut store, &blocks).unwrap();
        assert_eq!(cycle.state(), CycleState::Idle);
        assert_eq!(summary.relocated, 1);
        assert_eq!(summary.staged, 0);
        assert_eq!((summary.sent, summary.received), (0, 0));
        assert_eq!(store.len(), 2);
        assert_eq!(store.gids()[0], BlockId::new(1));

        // a second cycle on the same engine starts from Idle again
        cycle.run(&mut store, &blocks).unwrap();
        assert_eq!(cycle.state(), CycleState::Idle);
    }

    #[test]
    fn store_resized_mid_cycle_fails_the_cycle() {
        let comm = NoComm;
        let blocks = single_rank();
        let mut store = ParticleStore::new();
        store.push(Particle::new([0.2; 3], [0.0; 3], BlockId::new(0)));

        let mut cycle = MigrationCycle::new(&comm, MigrationConfig::default()).unwrap();
        cycle.update_ownership(&mut store, &blocks).unwrap();
        cycle.build_plan().unwrap();
        cycle.post_receives().unwrap();
        store.push(Particle::new([0.3; 3], [0.0; 3], BlockId::new(0)));
        assert!(matches!(
            cycle.pack_and_send(&store),
            Err(MigrateError::StoreModified)
        ));
        assert_eq!(cycle.state(), CycleState::Failed);
        assert!(matches!(
            cycle.update_ownership(&mut store, &blocks),
            Err(MigrateError::InvalidTransition { from: "Failed", .. })
        ));
    }

    #[test]
    fn foreign_particle_fails_the_cycle() {
        let comm = NoComm;
        let blocks = single_rank();
        let mut store = ParticleStore::new();
        store.push(Particle::new([0.2; 3], [0.0; 3], BlockId::new(99)));
        let mut cycle = MigrationCycle::new(&comm, MigrationConfig::default()).unwrap();
        assert!(matches!(
            cycle.update_ownership(&mut store, &blocks),
            Err(MigrateError::ParticleNotLocal { particle: 0, .. })
        ));
        assert_eq!(cycle.state(), CycleState::Failed);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = MigrationConfig {
            parallel_threshold: 0,
            ..MigrationConfig::default()
        };
        assert!(MigrationCycle::new(&NoComm, config).is_err());
    }
}
