//! Execution engine - coordinates the catalog, action log, machine
//! definitions, instances, and the journal.
//!
//! Every mutation is journaled with fully resolved ids, so reopening the
//! journal directory deterministically rebuilds the exact same state.
//! Each mutation journals before it touches memory, under the same lock
//! that serialized it: durable order matches in-memory order, and a
//! failed journal write leaves no row behind.

use crate::action::{Action, ActionLog};
use crate::catalog::Catalog;
use crate::definition::{Machine, MachineSpec, MachineStore, Transition};
use crate::error::CoreError;
use crate::evaluator::{next_turn, TurnOutcome};
use crate::instance::{Instance, InstanceStore};
use crate::views::{ActionDetail, InitialBinding, InstanceDetail};
use crate::{ActionId, ContextId, EventId, InstanceId, MachineId};
use actdb_journal::{Journal, JournalConfig, JournalEntry, StateRecord, SyncPolicy, TransitionRecord};
use std::path::PathBuf;
use std::sync::Arc;

/// Engine configuration: where the journal lives and how it syncs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dir: PathBuf,
    pub sync_policy: SyncPolicy,
    pub segment_size: u64,
}

impl EngineConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sync_policy: SyncPolicy::EveryAppend,
            segment_size: actdb_journal::DEFAULT_SEGMENT_SIZE,
        }
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    fn journal_config(&self) -> JournalConfig {
        JournalConfig::new(&self.dir)
            .with_segment_size(self.segment_size)
            .with_sync_policy(self.sync_policy)
    }
}

/// The execution engine.
pub struct ExecutionEngine {
    catalog: Catalog,
    log: ActionLog,
    machines: MachineStore,
    instances: InstanceStore,
    journal: Arc<Journal>,
}

impl ExecutionEngine {
    /// Opens (or creates) an engine at the configured directory and
    /// replays the journal to restore state.
    pub fn open(config: EngineConfig) -> Result<Self, CoreError> {
        let journal = Arc::new(Journal::open(config.journal_config())?);
        Self::with_journal(journal)
    }

    /// Creates an engine on an already-open journal and replays it.
    pub fn with_journal(journal: Arc<Journal>) -> Result<Self, CoreError> {
        let engine = Self {
            catalog: Catalog::new(),
            log: ActionLog::new(),
            machines: MachineStore::new(),
            instances: InstanceStore::new(),
            journal,
        };

        engine.replay_journal()?;

        Ok(engine)
    }

    fn replay_journal(&self) -> Result<(), CoreError> {
        let entries = self.journal.read_all()?;
        let entry_count = entries.len();

        for (_seq, _offset, entry) in entries {
            self.replay_entry(entry);
        }

        if entry_count > 0 {
            tracing::info!(
                "journal replay complete: {} entries, {} actions, {} instances",
                entry_count,
                self.log.len(),
                self.instances.len()
            );
        }

        Ok(())
    }

    /// Re-applies a single journal entry. Entries carry resolved ids, so
    /// replay never runs validation or name resolution again.
    fn replay_entry(&self, entry: JournalEntry) {
        match entry {
            JournalEntry::RegisterEvent { event_id, name } => {
                self.catalog.events().insert_replayed(event_id, &name);
            }

            JournalEntry::RegisterContext { context_id, name } => {
                self.catalog.contexts().insert_replayed(context_id, &name);
            }

            JournalEntry::AppendAction {
                action_id,
                predecessor_id,
                event_id,
                context_id,
                timestamp,
            } => {
                self.log.insert_replayed(Action {
                    id: action_id,
                    predecessor_id: Some(predecessor_id),
                    event_id,
                    context_id,
                    timestamp,
                });
            }

            JournalEntry::DefineMachine {
                machine_id,
                name,
                initial_state_id,
                new_states,
                transitions,
            } => {
                let machine = Machine {
                    id: machine_id,
                    name,
                    initial_state_id,
                };
                let states: Vec<(u64, String)> = new_states
                    .into_iter()
                    .map(|s| (s.state_id, s.name))
                    .collect();
                let rows: Vec<Transition> = transitions
                    .into_iter()
                    .map(|t| Transition {
                        id: t.transition_id,
                        machine_id,
                        event_id: t.event_id,
                        from_state_id: t.from_state_id,
                        next_state_id: t.next_state_id,
                    })
                    .collect();
                self.machines.insert_replayed(machine, &states, &rows);
            }

            JournalEntry::CreateInstance {
                instance_id,
                name,
                machine_id,
                context_id,
                state_id,
                last_action_id,
                created_at,
            } => {
                let mut instance =
                    Instance::new(instance_id, name, machine_id, context_id, state_id, created_at);
                instance.last_action_id = last_action_id;
                self.instances.insert_replayed(instance);
            }

            JournalEntry::AdvanceInstance {
                instance_id,
                action_id,
                to_state_id,
                at,
                ..
            } => {
                let applied = self.instances.with_mut(instance_id, |instance| {
                    instance.advance(action_id, to_state_id, at);
                    Ok(())
                });
                if applied.is_err() {
                    tracing::warn!("cannot replay advance for unknown instance {}", instance_id);
                }
            }

            JournalEntry::RetireInstance { instance_id, at } => {
                let applied = self.instances.with_mut(instance_id, |instance| {
                    instance.retire(at);
                    Ok(())
                });
                if applied.is_err() {
                    tracing::warn!("cannot replay retire for unknown instance {}", instance_id);
                }
            }

            JournalEntry::Checkpoint { .. } => {
                // Does not affect in-memory state.
            }
        }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Registers an event name.
    pub fn register_event(&self, name: &str) -> Result<EventId, CoreError> {
        self.catalog.events().register_with(name, |event_id| {
            self.journal.append(&JournalEntry::RegisterEvent {
                event_id,
                name: name.to_string(),
            })?;
            Ok(())
        })
    }

    /// Registers a context name.
    pub fn register_context(&self, name: &str) -> Result<ContextId, CoreError> {
        self.catalog.contexts().register_with(name, |context_id| {
            self.journal.append(&JournalEntry::RegisterContext {
                context_id,
                name: name.to_string(),
            })?;
            Ok(())
        })
    }

    pub fn resolve_event(&self, name: &str) -> Result<EventId, CoreError> {
        self.catalog.resolve_event(name)
    }

    pub fn resolve_context(&self, name: &str) -> Result<ContextId, CoreError> {
        self.catalog.resolve_context(name)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Appends an action to a context's chain.
    ///
    /// If `expected_head` is given and the chain has moved past it, the
    /// append is refused with a retryable `ConcurrentModification`.
    pub fn append_action(
        &self,
        context_id: ContextId,
        event_id: EventId,
        expected_head: Option<ActionId>,
    ) -> Result<Action, CoreError> {
        if !self.catalog.contexts().contains_id(context_id) {
            return Err(CoreError::UnknownReference {
                kind: "context",
                id: context_id,
            });
        }
        if !self.catalog.events().contains_id(event_id) {
            return Err(CoreError::UnknownReference {
                kind: "event",
                id: event_id,
            });
        }

        // Journaling runs inside the chain lock so durable records carry
        // chain order even with several producers on one context.
        self.log.append(context_id, event_id, expected_head, |action| {
            self.journal.append(&JournalEntry::AppendAction {
                action_id: action.id,
                // Appended actions always have a predecessor (genesis at least).
                predecessor_id: action.predecessor_id.unwrap_or(crate::GENESIS_ACTION),
                event_id: action.event_id,
                context_id: action.context_id,
                timestamp: action.timestamp,
            })?;
            Ok(())
        })
    }

    /// Records that an event occurred in a context, by name, registering
    /// either name on first use. Losing a first-registration race to
    /// another producer just resolves the winner's id.
    pub fn record(&self, context: &str, event: &str) -> Result<Action, CoreError> {
        let context_id = self
            .catalog
            .contexts()
            .resolve_or_register_with(context, |context_id| {
                self.journal.append(&JournalEntry::RegisterContext {
                    context_id,
                    name: context.to_string(),
                })?;
                Ok(())
            })?;
        let event_id = self
            .catalog
            .events()
            .resolve_or_register_with(event, |event_id| {
                self.journal.append(&JournalEntry::RegisterEvent {
                    event_id,
                    name: event.to_string(),
                })?;
                Ok(())
            })?;
        self.append_action(context_id, event_id, None)
    }

    /// Returns the latest action of a context (genesis if none).
    pub fn head(&self, context_id: ContextId) -> Action {
        self.log.head(context_id)
    }

    pub fn action(&self, action_id: ActionId) -> Result<Action, CoreError> {
        self.log.get(action_id)
    }

    // =========================================================================
    // Machine Definitions
    // =========================================================================

    /// Validates and commits a machine definition, journaling every
    /// allocated row as one entry.
    pub fn define_machine(&self, spec: &MachineSpec) -> Result<Machine, CoreError> {
        let defined = self
            .machines
            .define(spec, self.catalog.events(), |defined| {
                self.journal.append(&JournalEntry::DefineMachine {
                    machine_id: defined.machine.id,
                    name: defined.machine.name.clone(),
                    initial_state_id: defined.machine.initial_state_id,
                    new_states: defined
                        .new_states
                        .iter()
                        .map(|(state_id, name)| StateRecord {
                            state_id: *state_id,
                            name: name.clone(),
                        })
                        .collect(),
                    transitions: defined
                        .transitions
                        .iter()
                        .map(|t| TransitionRecord {
                            transition_id: t.id,
                            event_id: t.event_id,
                            from_state_id: t.from_state_id,
                            next_state_id: t.next_state_id,
                        })
                        .collect(),
                })?;
                Ok(())
            })?;

        Ok(defined.machine)
    }

    pub fn machine(&self, machine_id: MachineId) -> Result<Machine, CoreError> {
        self.machines.machine(machine_id)
    }

    pub fn machine_by_name(&self, name: &str) -> Result<Machine, CoreError> {
        self.machines.machine_by_name(name)
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Creates an instance of a machine, bound to a context, starting at
    /// the machine's initial state with no actions consumed.
    pub fn create_instance(
        &self,
        machine_id: MachineId,
        context_id: ContextId,
        name: Option<&str>,
    ) -> Result<Instance, CoreError> {
        let machine = self.machines.machine(machine_id)?;
        if !self.catalog.contexts().contains_id(context_id) {
            return Err(CoreError::UnknownReference {
                kind: "context",
                id: context_id,
            });
        }

        self.instances.create(
            name,
            machine.id,
            context_id,
            machine.initial_state_id,
            |instance| {
                self.journal.append(&JournalEntry::CreateInstance {
                    instance_id: instance.id,
                    name: instance.name.clone(),
                    machine_id: instance.machine_id,
                    context_id: instance.context_id,
                    state_id: instance.state_id,
                    last_action_id: instance.last_action_id,
                    created_at: instance.created_at,
                })?;
                Ok(())
            },
        )
    }

    /// Returns a snapshot of an instance.
    pub fn instance(&self, instance_id: InstanceId) -> Result<Instance, CoreError> {
        self.instances.get(instance_id)
    }

    /// Returns snapshots of all instances.
    pub fn instances(&self) -> Vec<Instance> {
        self.instances.all()
    }

    /// Runs one evaluation cycle for an instance.
    ///
    /// At most one action is consumed: the first unconsumed action on the
    /// instance's context chain with a defined transition from the current
    /// state. An exhausted chain is an idle outcome, not an error. The
    /// whole cycle runs under the instance's write lock, and the advance is
    /// journaled before it lands in memory.
    pub fn take_turn(&self, instance_id: InstanceId) -> Result<TurnOutcome, CoreError> {
        self.instances.with_mut(instance_id, |instance| {
            if instance.is_retired() {
                return Err(CoreError::InstanceRetired { instance_id });
            }

            let pending = match next_turn(&self.log, &self.machines, instance)? {
                Some(pending) => pending,
                None => return Ok(TurnOutcome::idle(instance)),
            };

            let from_state_id = instance.state_id;
            let at = chrono::Utc::now().timestamp_millis();

            self.journal.append(&JournalEntry::AdvanceInstance {
                instance_id,
                action_id: pending.action_id,
                from_state_id,
                to_state_id: pending.next_state_id,
                at,
            })?;

            instance.advance(pending.action_id, pending.next_state_id, at);

            Ok(TurnOutcome {
                instance_id,
                advanced: true,
                action_id: Some(pending.action_id),
                from_state_id,
                to_state_id: pending.next_state_id,
            })
        })
    }

    /// Retires an instance (soft). Idempotent.
    pub fn retire_instance(&self, instance_id: InstanceId) -> Result<(), CoreError> {
        self.instances.with_mut(instance_id, |instance| {
            if instance.is_retired() {
                return Ok(());
            }

            let at = chrono::Utc::now().timestamp_millis();
            self.journal
                .append(&JournalEntry::RetireInstance { instance_id, at })?;
            instance.retire(at);
            Ok(())
        })
    }

    // =========================================================================
    // Read Views
    // =========================================================================

    /// An action joined with its event and context names.
    pub fn action_detail(&self, action_id: ActionId) -> Result<ActionDetail, CoreError> {
        let action = self.log.get(action_id)?;
        Ok(ActionDetail {
            action_id: action.id,
            predecessor_id: action.predecessor_id,
            event_id: action.event_id,
            event_name: self.catalog.events().name_of(action.event_id)?,
            context_id: action.context_id,
            context_name: self.catalog.contexts().name_of(action.context_id)?,
            timestamp: action.timestamp,
        })
    }

    /// The full history of a context, in chain order, joined with names.
    pub fn context_history(&self, context_id: ContextId) -> Result<Vec<ActionDetail>, CoreError> {
        let context_name = self.catalog.contexts().name_of(context_id)?;
        let chain = self.log.chain(context_id)?;
        let mut rows = Vec::with_capacity(chain.len());
        for action in chain {
            rows.push(ActionDetail {
                action_id: action.id,
                predecessor_id: action.predecessor_id,
                event_id: action.event_id,
                event_name: self.catalog.events().name_of(action.event_id)?,
                context_id,
                context_name: context_name.clone(),
                timestamp: action.timestamp,
            });
        }
        Ok(rows)
    }

    /// An instance joined with its machine, context, and state names.
    pub fn instance_detail(&self, instance_id: InstanceId) -> Result<InstanceDetail, CoreError> {
        let instance = self.instances.get(instance_id)?;
        let machine = self.machines.machine(instance.machine_id)?;
        Ok(InstanceDetail {
            instance_id: instance.id,
            instance_name: instance.name,
            machine_id: machine.id,
            machine_name: machine.name,
            context_id: instance.context_id,
            context_name: self.catalog.contexts().name_of(instance.context_id)?,
            state_id: instance.state_id,
            state_name: self.machines.states().name_of(instance.state_id)?,
            last_action_id: instance.last_action_id,
        })
    }

    /// The row needed to instantiate a machine by name: its initial state
    /// and the genesis action a fresh instance starts from.
    pub fn initial_binding(&self, machine_name: &str) -> Result<InitialBinding, CoreError> {
        let machine = self.machines.machine_by_name(machine_name)?;
        Ok(InitialBinding {
            machine_id: machine.id,
            machine_name: machine.name,
            initial_state_id: machine.initial_state_id,
            initial_state_name: self.machines.states().name_of(machine.initial_state_id)?,
            last_action_id: crate::GENESIS_ACTION,
        })
    }

    // =========================================================================
    // Journal Access
    // =========================================================================

    /// Writes a checkpoint marker.
    pub fn checkpoint(&self) -> Result<(), CoreError> {
        self.journal.append(&JournalEntry::Checkpoint {
            timestamp: chrono::Utc::now().timestamp_millis(),
        })?;
        self.journal.sync()?;
        Ok(())
    }

    /// Syncs the journal to disk.
    pub fn sync(&self) -> Result<(), CoreError> {
        self.journal.sync()?;
        Ok(())
    }

    /// Returns a reference to the journal.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }
}
