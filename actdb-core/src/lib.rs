//! Execution engine: causal action chains and deterministic machine instances.
//!
//! The engine keeps an append-only chain of actions per context, a catalog of
//! named events and contexts, machine definitions (states and transitions),
//! and live instances that consume at most one action per turn. Every mutation
//! is journaled before it touches memory, so reopening the journal directory
//! rebuilds identical state.

pub mod action;
pub mod catalog;
pub mod definition;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod instance;
pub mod views;

pub use action::{Action, ActionLog};
pub use catalog::{Catalog, Registry};
pub use definition::{Machine, MachineSpec, MachineStore, Transition, TransitionSpec};
pub use engine::{EngineConfig, ExecutionEngine};
pub use error::CoreError;
pub use evaluator::{PendingTurn, TurnOutcome};
pub use instance::{Instance, InstanceStatus, InstanceStore};
pub use views::{ActionDetail, InitialBinding, InstanceDetail};

/// Identifier for a registered event name.
pub type EventId = u64;
/// Identifier for a registered context name.
pub type ContextId = u64;
/// Identifier for an appended action.
pub type ActionId = u64;
/// Identifier for a state name.
pub type StateId = u64;
/// Identifier for a machine definition.
pub type MachineId = u64;
/// Identifier for a machine instance.
pub type InstanceId = u64;
/// Identifier for a transition row.
pub type TransitionId = u64;

/// The sentinel "begin" event, present in every catalog.
pub const BEGIN_EVENT: EventId = 0;
/// The sentinel "void" context, present in every catalog.
pub const VOID_CONTEXT: ContextId = 0;
/// The genesis action every chain descends from.
pub const GENESIS_ACTION: ActionId = 0;
