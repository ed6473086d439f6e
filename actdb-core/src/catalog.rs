//! Name catalog: uniqueness-enforcing registries for events and contexts.
//!
//! Both registries share one implementation with independent id spaces.
//! Id 0 is reserved in each for a sentinel row (`begin` / `void`) that is
//! materialized at construction and can never be re-registered or removed.

use crate::error::CoreError;
use crate::{ContextId, EventId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A uniqueness-enforcing name registry with monotonically increasing ids.
///
/// Also used by the machine definition store for the shared state namespace.
pub struct Registry {
    kind: &'static str,
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    by_name: HashMap<String, u64>,
    by_id: HashMap<u64, String>,
    next_id: u64,
}

impl Registry {
    /// Creates an empty registry; the first allocated id is 1.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: RwLock::new(RegistryInner {
                by_name: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Creates a registry seeded with a sentinel row at id 0.
    pub fn with_sentinel(kind: &'static str, sentinel: &str) -> Self {
        let registry = Self::new(kind);
        {
            let mut inner = registry.inner.write();
            inner.by_name.insert(sentinel.to_string(), 0);
            inner.by_id.insert(0, sentinel.to_string());
        }
        registry
    }

    /// Registers a name, allocating a fresh id.
    pub fn register(&self, name: &str) -> Result<u64, CoreError> {
        self.register_with(name, |_| Ok(()))
    }

    /// Registers a name, running `persist` with the allocated id before the
    /// row becomes visible.
    ///
    /// `persist` runs under the registry's write lock; if it fails, the
    /// registration never happened. This is how callers make the durable
    /// record and the in-memory row a single atomic step.
    pub fn register_with(
        &self,
        name: &str,
        persist: impl FnOnce(u64) -> Result<(), CoreError>,
    ) -> Result<u64, CoreError> {
        if name.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: format!("empty {} name", self.kind),
            });
        }

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(CoreError::DuplicateName {
                kind: self.kind,
                name: name.to_string(),
            });
        }

        Self::commit(&mut inner, name, persist)
    }

    fn commit(
        inner: &mut RegistryInner,
        name: &str,
        persist: impl FnOnce(u64) -> Result<(), CoreError>,
    ) -> Result<u64, CoreError> {
        let id = inner.next_id;
        persist(id)?;
        inner.next_id = id + 1;
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, name.to_string());
        Ok(id)
    }

    /// Resolves a name to its id.
    pub fn resolve(&self, name: &str) -> Result<u64, CoreError> {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::NotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    /// Resolves a name, registering it if absent.
    pub fn resolve_or_register(&self, name: &str) -> Result<u64, CoreError> {
        self.resolve_or_register_with(name, |_| Ok(()))
    }

    /// Resolves a name, registering it (with `persist`, as in
    /// [`Registry::register_with`]) if absent.
    ///
    /// Two callers racing to register the same name both succeed with the
    /// same id; the loser of the write-lock race finds the row already
    /// present and never runs `persist`.
    pub fn resolve_or_register_with(
        &self,
        name: &str,
        persist: impl FnOnce(u64) -> Result<(), CoreError>,
    ) -> Result<u64, CoreError> {
        if let Some(&id) = self.inner.read().by_name.get(name) {
            return Ok(id);
        }
        if name.is_empty() {
            return Err(CoreError::InvalidDefinition {
                reason: format!("empty {} name", self.kind),
            });
        }

        let mut inner = self.inner.write();
        // Re-check: another writer may have registered it meanwhile.
        if let Some(&id) = inner.by_name.get(name) {
            return Ok(id);
        }
        Self::commit(&mut inner, name, persist)
    }

    /// Returns the name for an id.
    pub fn name_of(&self, id: u64) -> Result<String, CoreError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(CoreError::UnknownReference {
                kind: self.kind,
                id,
            })
    }

    /// Returns true if the id exists.
    pub fn contains_id(&self, id: u64) -> bool {
        self.inner.read().by_id.contains_key(&id)
    }

    /// The id the next successful registration will receive. Only
    /// meaningful while the caller serializes registrations externally.
    pub(crate) fn peek_next_id(&self) -> u64 {
        self.inner.read().next_id
    }

    /// Inserts a row with a fixed id during journal replay.
    pub fn insert_replayed(&self, id: u64, name: &str) {
        let mut inner = self.inner.write();
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, name.to_string());
        if id >= inner.next_id {
            inner.next_id = id + 1;
        }
    }

    /// Number of registered rows, sentinel included.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

/// The catalog: event and context registries.
pub struct Catalog {
    events: Registry,
    contexts: Registry,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            events: Registry::with_sentinel("event", "begin"),
            contexts: Registry::with_sentinel("context", "void"),
        }
    }

    pub fn events(&self) -> &Registry {
        &self.events
    }

    pub fn contexts(&self) -> &Registry {
        &self.contexts
    }

    pub fn register_event(&self, name: &str) -> Result<EventId, CoreError> {
        self.events.register(name)
    }

    pub fn register_context(&self, name: &str) -> Result<ContextId, CoreError> {
        self.contexts.register(name)
    }

    pub fn resolve_event(&self, name: &str) -> Result<EventId, CoreError> {
        self.events.resolve(name)
    }

    pub fn resolve_context(&self, name: &str) -> Result<ContextId, CoreError> {
        self.contexts.resolve(name)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
