//! The action log: append-only causal chains of event occurrences.
//!
//! Every context owns one strictly linear chain of actions rooted at the
//! genesis action (id 0). Appends are serialized per context so two writers
//! can never observe the same head and fork the chain; writers on different
//! contexts do not block each other.

use crate::error::CoreError;
use crate::{ActionId, ContextId, EventId, BEGIN_EVENT, GENESIS_ACTION, VOID_CONTEXT};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One immutable, causally chained record that an event occurred in a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// The immediately preceding action in this context's history;
    /// `None` only for the genesis action.
    pub predecessor_id: Option<ActionId>,
    pub event_id: EventId,
    pub context_id: ContextId,
    /// Creation time (Unix millis).
    pub timestamp: i64,
}

impl Action {
    /// The sentinel root action every chain descends from.
    pub fn genesis() -> Self {
        Self {
            id: GENESIS_ACTION,
            predecessor_id: None,
            event_id: BEGIN_EVENT,
            context_id: VOID_CONTEXT,
            timestamp: 0,
        }
    }
}

/// Append-only store of actions, indexed by id and by context chain.
pub struct ActionLog {
    actions: DashMap<ActionId, Action>,
    /// Per-context chains in append order. The genesis action is not a
    /// member of any chain; an empty (or absent) chain's head is genesis.
    chains: DashMap<ContextId, Arc<Mutex<Vec<ActionId>>>>,
    next_id: AtomicU64,
}

impl ActionLog {
    pub fn new() -> Self {
        let log = Self {
            actions: DashMap::new(),
            chains: DashMap::new(),
            next_id: AtomicU64::new(1),
        };
        log.actions.insert(GENESIS_ACTION, Action::genesis());
        log
    }

    fn chain_handle(&self, context_id: ContextId) -> Arc<Mutex<Vec<ActionId>>> {
        self.chains
            .entry(context_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Appends an action to a context's chain.
    ///
    /// The read-modify-write of the chain head runs under that context's
    /// lock. If `expected_head` is given and no longer matches, the append
    /// is refused with `ConcurrentModification` so the caller can re-read
    /// and retry.
    ///
    /// `persist` runs while the chain lock is held, before the action
    /// becomes visible. Durable records therefore carry the same per-chain
    /// order as the in-memory chain, and a failed persist leaves the chain
    /// untouched.
    pub fn append(
        &self,
        context_id: ContextId,
        event_id: EventId,
        expected_head: Option<ActionId>,
        persist: impl FnOnce(&Action) -> Result<(), CoreError>,
    ) -> Result<Action, CoreError> {
        let handle = self.chain_handle(context_id);
        let mut chain = handle.lock();

        let head_id = chain.last().copied().unwrap_or(GENESIS_ACTION);
        if let Some(expected) = expected_head {
            if head_id != expected {
                return Err(CoreError::ConcurrentModification {
                    kind: "context",
                    id: context_id,
                    expected,
                    actual: head_id,
                });
            }
        }

        let action = Action {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            predecessor_id: Some(head_id),
            event_id,
            context_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        persist(&action)?;

        self.actions.insert(action.id, action.clone());
        chain.push(action.id);

        Ok(action)
    }

    /// Returns the latest action for a context (genesis if none).
    pub fn head(&self, context_id: ContextId) -> Action {
        let head_id = self
            .chains
            .get(&context_id)
            .and_then(|c| c.lock().last().copied())
            .unwrap_or(GENESIS_ACTION);
        // Chain members are always present in the action index.
        self.actions
            .get(&head_id)
            .map(|a| a.clone())
            .unwrap_or_else(Action::genesis)
    }

    /// Looks up an action by id.
    pub fn get(&self, action_id: ActionId) -> Result<Action, CoreError> {
        self.actions
            .get(&action_id)
            .map(|a| a.clone())
            .ok_or(CoreError::UnknownReference {
                kind: "action",
                id: action_id,
            })
    }

    /// Returns the actions of a context strictly after `after_id`, in chain
    /// order up to the current head.
    ///
    /// `after_id` must be genesis or a member of this context's chain;
    /// anything else is a `ChainIntegrity` violation (cross-context
    /// mis-binding or corruption) and is fatal for the caller.
    pub fn chain_after(
        &self,
        context_id: ContextId,
        after_id: ActionId,
    ) -> Result<Vec<Action>, CoreError> {
        let handle = self.chain_handle(context_id);
        let chain = handle.lock();

        let start = if after_id == GENESIS_ACTION {
            0
        } else {
            // Ids are allocated monotonically, so a chain is sorted by id.
            match chain.binary_search(&after_id) {
                Ok(pos) => pos + 1,
                Err(_) => {
                    return Err(CoreError::ChainIntegrity {
                        context_id,
                        action_id: after_id,
                    })
                }
            }
        };

        let mut suffix = Vec::with_capacity(chain.len() - start);
        for &id in &chain[start..] {
            suffix.push(self.get(id)?);
        }
        Ok(suffix)
    }

    /// Full chain of a context in order, genesis excluded.
    pub fn chain(&self, context_id: ContextId) -> Result<Vec<Action>, CoreError> {
        self.chain_after(context_id, GENESIS_ACTION)
    }

    /// Total number of actions, genesis included.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Re-inserts an action with its original id during journal replay.
    pub fn insert_replayed(&self, action: Action) {
        let handle = self.chain_handle(action.context_id);
        let mut chain = handle.lock();

        self.next_id.fetch_max(action.id + 1, Ordering::SeqCst);
        self.actions.insert(action.id, action.clone());
        chain.push(action.id);
    }
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new()
    }
}
