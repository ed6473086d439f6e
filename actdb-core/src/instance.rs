//! Instance state management.
//!
//! An instance is a live binding of one machine to one context. Its
//! `(last_action_id, state_id)` pair is only ever written together, under
//! the instance's write lock, so the pair always describes one consistent
//! point on the context's chain.

use crate::error::CoreError;
use crate::{ActionId, ContextId, InstanceId, MachineId, StateId, GENESIS_ACTION};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Instance is live and may consume actions.
    #[default]
    Active,
    /// Instance is retired; its history remains, it takes no more turns.
    Retired,
}

/// A running binding of one machine to one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub machine_id: MachineId,
    pub context_id: ContextId,
    /// Current state in the machine.
    pub state_id: StateId,
    /// Most recent action this instance has consumed (genesis = none yet).
    pub last_action_id: ActionId,
    pub status: InstanceStatus,
    /// Creation timestamp (Unix millis).
    pub created_at: i64,
    /// Last update timestamp (Unix millis).
    pub updated_at: i64,
}

impl Instance {
    pub fn new(
        id: InstanceId,
        name: impl Into<String>,
        machine_id: MachineId,
        context_id: ContextId,
        initial_state_id: StateId,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            machine_id,
            context_id,
            state_id: initial_state_id,
            last_action_id: GENESIS_ACTION,
            status: InstanceStatus::Active,
            created_at,
            updated_at: created_at,
        }
    }

    /// Applies a consumed action and new state as one unit.
    pub fn advance(&mut self, action_id: ActionId, state_id: StateId, at: i64) {
        self.last_action_id = action_id;
        self.state_id = state_id;
        self.updated_at = at;
    }

    /// Marks the instance as retired.
    pub fn retire(&mut self, at: i64) {
        self.status = InstanceStatus::Retired;
        self.updated_at = at;
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    pub fn is_retired(&self) -> bool {
        self.status == InstanceStatus::Retired
    }
}

/// Store of instances with per-instance locking.
pub struct InstanceStore {
    instances: DashMap<InstanceId, RwLock<Instance>>,
    next_id: AtomicU64,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a new instance bound to a machine's initial state.
    ///
    /// `persist` runs before the instance becomes visible; on failure the
    /// store is unchanged.
    pub fn create(
        &self,
        name: Option<&str>,
        machine_id: MachineId,
        context_id: ContextId,
        initial_state_id: StateId,
        persist: impl FnOnce(&Instance) -> Result<(), CoreError>,
    ) -> Result<Instance, CoreError> {
        let now = chrono::Utc::now();
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("began:{}", now.to_rfc3339()),
        };

        let instance = Instance::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            name,
            machine_id,
            context_id,
            initial_state_id,
            now.timestamp_millis(),
        );
        persist(&instance)?;
        self.instances
            .insert(instance.id, RwLock::new(instance.clone()));
        Ok(instance)
    }

    /// Returns a snapshot of an instance.
    pub fn get(&self, instance_id: InstanceId) -> Result<Instance, CoreError> {
        self.instances
            .get(&instance_id)
            .map(|r| r.read().clone())
            .ok_or(CoreError::UnknownReference {
                kind: "instance",
                id: instance_id,
            })
    }

    /// Runs `f` with the instance's write lock held.
    ///
    /// This is the sole mutation path; `f` sees a stable
    /// `(last_action_id, state_id)` pair and its writes are atomic with
    /// respect to other evaluators of the same instance.
    pub fn with_mut<T>(
        &self,
        instance_id: InstanceId,
        f: impl FnOnce(&mut Instance) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let entry = self
            .instances
            .get(&instance_id)
            .ok_or(CoreError::UnknownReference {
                kind: "instance",
                id: instance_id,
            })?;
        let mut instance = entry.write();
        f(&mut instance)
    }

    /// Returns snapshots of all instances.
    pub fn all(&self) -> Vec<Instance> {
        self.instances.iter().map(|r| r.value().read().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Re-inserts an instance with its original id during journal replay.
    pub fn insert_replayed(&self, instance: Instance) {
        self.next_id.fetch_max(instance.id + 1, Ordering::SeqCst);
        self.instances.insert(instance.id, RwLock::new(instance));
    }
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new()
    }
}
