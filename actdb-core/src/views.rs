//! Read views consumed by external drivers.
//!
//! Joined projections over the stores, mirroring the relational views the
//! schema exposes: action detail, instance detail, and the initial-binding
//! row used to instantiate a new instance from a machine name.

use crate::{ActionId, ContextId, EventId, InstanceId, MachineId, StateId};
use serde::{Deserialize, Serialize};

/// An action joined with its event and context names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDetail {
    pub action_id: ActionId,
    pub predecessor_id: Option<ActionId>,
    pub event_id: EventId,
    pub event_name: String,
    pub context_id: ContextId,
    pub context_name: String,
    pub timestamp: i64,
}

/// An instance joined with its machine and state names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetail {
    pub instance_id: InstanceId,
    pub instance_name: String,
    pub machine_id: MachineId,
    pub machine_name: String,
    pub context_id: ContextId,
    pub context_name: String,
    pub state_id: StateId,
    pub state_name: String,
    pub last_action_id: ActionId,
}

/// The row needed to instantiate a new instance of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialBinding {
    pub machine_id: MachineId,
    pub machine_name: String,
    pub initial_state_id: StateId,
    pub initial_state_name: String,
    /// The genesis action id a fresh instance starts from.
    pub last_action_id: ActionId,
}
