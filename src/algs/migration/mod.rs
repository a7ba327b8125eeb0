//! Cross-rank particle migration.
//!
//! A cycle runs four stages in order: ownership update ([`gid_update`]),
//! send-list construction ([`send_list`]), global plan exchange
//! ([`plan_exchange`]), and transport ([`transport`]). [`cycle`] drives
//! them as six phase operations.

pub mod cycle;
pub mod gid_update;
pub mod plan_exchange;
pub mod send_list;
pub mod transport;

pub use cycle::{CycleState, CycleSummary, MigrationCycle};
pub use gid_update::{GidUpdateReport, GidUpdater, SendListEntry, StagingBuffer, wrap_periodic};
pub use plan_exchange::{GlobalSendTable, exchange_plan};
pub use send_list::{SendPlan, SendPlanTuple};
pub use transport::{InboundSlice, TransportEngine};
