//! actdb - log-based event execution engine.
//!
//! An append-only causal history of actions (event occurrences scoped to a
//! context) combined with a deterministic FSM layer that advances instances
//! in lockstep with that history. Every state transition is a pure function
//! of the persisted journal, so a reopened engine always converges to the
//! same state.
//!
//! This crate is a facade over the workspace members:
//! - [`actdb_journal`]: durable append-only journal (segments, checksums,
//!   recovery)
//! - [`actdb_core`]: catalog, action log, machine definitions, instances,
//!   and the transition evaluator

pub use actdb_core::{
    Action, ActionDetail, Catalog, CoreError, EngineConfig, ExecutionEngine, InitialBinding,
    Instance, InstanceDetail, InstanceStatus, MachineSpec, TransitionSpec, TurnOutcome,
};
pub use actdb_journal::{Journal, JournalConfig, JournalEntry, JournalError, SyncPolicy};
