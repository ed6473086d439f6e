//! Machine definitions: states, machines, transitions.
//!
//! Machines are described declaratively and validated before any row is
//! created. The wire format is JSON:
//!
//! ```json
//! {
//!   "name": "turnstile",
//!   "begin": "locked",
//!   "state": ["locked", "unlocked"],
//!   "transition": [
//!     {"event": "push", "from": "locked", "next": "locked"},
//!     {"event": "coin", "from": "locked", "next": "unlocked"},
//!     {"event": "push", "from": "unlocked", "next": "locked"},
//!     {"event": "coin", "from": "unlocked", "next": "unlocked"}
//!   ]
//! }
//! ```
//!
//! `initial`/`states`/`transitions` are accepted as aliases for the
//! `begin`/`state`/`transition` field names above.

use crate::catalog::Registry;
use crate::error::CoreError;
use crate::{EventId, MachineId, StateId, TransitionId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One transition triple in a machine description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub event: String,
    pub from: String,
    pub next: String,
}

/// Declarative machine description (the sole construction input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub name: String,

    /// Initial state for new instances.
    #[serde(rename = "begin", alias = "initial")]
    pub initial: String,

    /// State names. States are a shared namespace: a name already known to
    /// the store refers to the same state entity across machines.
    #[serde(rename = "state", alias = "states")]
    pub states: Vec<String>,

    #[serde(rename = "transition", alias = "transitions", default)]
    pub transitions: Vec<TransitionSpec>,
}

impl MachineSpec {
    /// Parses a machine description from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(json.clone())?)
    }
}

/// A machine row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub initial_state_id: StateId,
}

/// A transition row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub machine_id: MachineId,
    pub event_id: EventId,
    pub from_state_id: StateId,
    pub next_state_id: StateId,
}

/// Result of committing a machine definition; carries every allocated row
/// so the engine can journal the definition as one entry.
#[derive(Debug, Clone)]
pub struct DefinedMachine {
    pub machine: Machine,
    /// State rows this definition created (names already present are not
    /// repeated here).
    pub new_states: Vec<(StateId, String)>,
    pub transitions: Vec<Transition>,
}

/// Read-mostly store of states, machines, and transitions.
pub struct MachineStore {
    /// Shared state namespace across machines.
    states: Registry,
    machines: RwLock<HashMap<MachineId, Machine>>,
    machines_by_name: RwLock<HashMap<String, MachineId>>,
    /// Transitions keyed by (machine, from_state, event) for O(1) lookup.
    transitions: RwLock<HashMap<(MachineId, StateId, EventId), Transition>>,
    next_machine_id: AtomicU64,
    next_transition_id: AtomicU64,
    /// Serializes definitions so validation-then-commit is atomic.
    define_lock: Mutex<()>,
}

impl MachineStore {
    pub fn new() -> Self {
        Self {
            states: Registry::new("state"),
            machines: RwLock::new(HashMap::new()),
            machines_by_name: RwLock::new(HashMap::new()),
            transitions: RwLock::new(HashMap::new()),
            next_machine_id: AtomicU64::new(1),
            next_transition_id: AtomicU64::new(1),
            define_lock: Mutex::new(()),
        }
    }

    /// Validates a machine description and commits it all-or-nothing.
    ///
    /// Every row the definition needs is planned first, `persist` runs on
    /// the planned rows, and only then does the store mutate. A failed
    /// validation or persist leaves the store exactly as it was;
    /// configuration errors can therefore never surface mid-evaluation.
    pub fn define(
        &self,
        spec: &MachineSpec,
        events: &Registry,
        persist: impl FnOnce(&DefinedMachine) -> Result<(), CoreError>,
    ) -> Result<DefinedMachine, CoreError> {
        let _guard = self.define_lock.lock();

        if spec.name.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: "empty machine name".to_string(),
            });
        }
        if self.machines_by_name.read().contains_key(&spec.name) {
            return Err(CoreError::DuplicateName {
                kind: "machine",
                name: spec.name.clone(),
            });
        }
        if spec.states.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: format!("machine '{}' has no states", spec.name),
            });
        }

        // Plan state rows. Declared names already in the shared namespace
        // keep their id; new names take the ids the registry will hand out
        // on commit. The define lock serializes every writer of the state
        // registry, so the peeked ids cannot be taken out from under us.
        let mut state_ids: HashMap<&str, StateId> = HashMap::new();
        let mut new_states: Vec<(StateId, String)> = Vec::new();
        let mut next_state_id = self.states.peek_next_id();
        for name in &spec.states {
            if state_ids.contains_key(name.as_str()) {
                continue;
            }
            match self.states.resolve(name) {
                Ok(id) => {
                    state_ids.insert(name, id);
                }
                Err(_) => {
                    state_ids.insert(name, next_state_id);
                    new_states.push((next_state_id, name.clone()));
                    next_state_id += 1;
                }
            }
        }

        // Undeclared states are still valid when the shared namespace
        // already knows them.
        let resolve_state = |name: &str| -> Result<StateId, CoreError> {
            match state_ids.get(name) {
                Some(&id) => Ok(id),
                None => self.states.resolve(name),
            }
        };

        let initial_state_id =
            resolve_state(&spec.initial).map_err(|_| CoreError::InvalidDefinition {
                reason: format!(
                    "initial state '{}' of machine '{}' is not a known state",
                    spec.initial, spec.name
                ),
            })?;

        let machine = Machine {
            id: self.next_machine_id.load(Ordering::SeqCst),
            name: spec.name.clone(),
            initial_state_id,
        };

        // Resolve every transition before touching storage.
        let mut transitions: Vec<Transition> = Vec::with_capacity(spec.transitions.len());
        let mut seen: HashMap<(StateId, EventId), StateId> = HashMap::new();
        let mut next_transition_id = self.next_transition_id.load(Ordering::SeqCst);
        for t in &spec.transitions {
            let event_id = events.resolve(&t.event)?;
            let from_state_id = resolve_state(&t.from)?;
            let next_state_id = resolve_state(&t.next)?;
            match seen.get(&(from_state_id, event_id)) {
                // Restating the identical triple is tolerated; a different
                // next state is non-determinism and is refused.
                Some(&next) if next == next_state_id => continue,
                Some(_) => {
                    return Err(CoreError::DuplicateTransition {
                        machine: spec.name.clone(),
                        event: t.event.clone(),
                        from: t.from.clone(),
                    })
                }
                None => {
                    seen.insert((from_state_id, event_id), next_state_id);
                    transitions.push(Transition {
                        id: next_transition_id,
                        machine_id: machine.id,
                        event_id,
                        from_state_id,
                        next_state_id,
                    });
                    next_transition_id += 1;
                }
            }
        }

        let defined = DefinedMachine {
            machine,
            new_states,
            transitions,
        };

        // Durable before visible: nothing is in memory yet, so a persist
        // failure needs no rollback.
        persist(&defined)?;
        self.insert_replayed(
            defined.machine.clone(),
            &defined.new_states,
            &defined.transitions,
        );

        Ok(defined)
    }

    /// Looks up the next state for (machine, current state, event).
    pub fn transition(
        &self,
        machine_id: MachineId,
        state_id: StateId,
        event_id: EventId,
    ) -> Option<StateId> {
        self.transitions
            .read()
            .get(&(machine_id, state_id, event_id))
            .map(|t| t.next_state_id)
    }

    pub fn machine(&self, machine_id: MachineId) -> Result<Machine, CoreError> {
        self.machines
            .read()
            .get(&machine_id)
            .cloned()
            .ok_or(CoreError::UnknownReference {
                kind: "machine",
                id: machine_id,
            })
    }

    pub fn machine_by_name(&self, name: &str) -> Result<Machine, CoreError> {
        let id = self
            .machines_by_name
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::NotFound {
                kind: "machine",
                name: name.to_string(),
            })?;
        self.machine(id)
    }

    /// The shared state namespace.
    pub fn states(&self) -> &Registry {
        &self.states
    }

    /// Re-applies a defined machine with fixed ids during journal replay.
    pub fn insert_replayed(
        &self,
        machine: Machine,
        new_states: &[(StateId, String)],
        transitions: &[Transition],
    ) {
        for (id, name) in new_states {
            self.states.insert_replayed(*id, name);
        }
        self.next_machine_id
            .fetch_max(machine.id + 1, Ordering::SeqCst);

        let mut by_key = self.transitions.write();
        for row in transitions {
            self.next_transition_id
                .fetch_max(row.id + 1, Ordering::SeqCst);
            by_key.insert((row.machine_id, row.from_state_id, row.event_id), row.clone());
        }
        drop(by_key);

        self.machines_by_name
            .write()
            .insert(machine.name.clone(), machine.id);
        self.machines.write().insert(machine.id, machine);
    }
}

impl Default for MachineStore {
    fn default() -> Self {
        Self::new()
    }
}
