//! Fact storage and handle allocation.
//!
//! The `FactStore` owns every live fact of a session together with its
//! extracted field values. Handles are allocated by a `HandleAllocator`
//! that can be shared with other threads, so facts can be queued from
//! outside the session and still get their handles immediately.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tessera_foundation::{Error, FactHandle, IndexedMap, Result, Value};

use crate::schema::{TypeKey, TypeSchema};

/// A fact object shared with the application.
pub type Fact = Arc<dyn Any + Send + Sync>;

/// Allocates handles for one session.
///
/// Handles are never reused within a session.
#[derive(Debug)]
pub struct HandleAllocator {
    session: u32,
    next: AtomicU64,
}

impl HandleAllocator {
    /// Creates an allocator for the given session id.
    #[must_use]
    pub fn new(session: u32) -> Self {
        Self {
            session,
            next: AtomicU64::new(0),
        }
    }

    /// The session this allocator belongs to.
    #[must_use]
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Allocates a fresh handle.
    pub fn allocate(&self) -> FactHandle {
        FactHandle::new(self.session, self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of handles handed out so far.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Checks that a handle was minted by this allocator.
    ///
    /// # Errors
    ///
    /// Returns a foreign-handle error for handles from another session and
    /// an unknown-handle error for indices never allocated here.
    pub fn validate(&self, handle: FactHandle) -> Result<()> {
        if handle.session != self.session {
            return Err(Error::foreign_handle(handle));
        }
        if handle.is_null() || handle.index >= self.allocated() {
            return Err(Error::unknown_handle(handle));
        }
        Ok(())
    }
}

/// A stored fact with its extracted field values.
#[derive(Clone)]
pub struct FactRecord {
    handle: FactHandle,
    type_key: TypeKey,
    fact: Fact,
    values: Vec<Value>,
    /// Cached alpha condition outcomes, by per-type condition slot.
    outcomes: Vec<Option<bool>>,
}

impl FactRecord {
    /// Creates a record with values extracted through `schema`.
    #[must_use]
    pub fn new(handle: FactHandle, schema: &TypeSchema, fact: Fact) -> Self {
        let values = schema.extract_all(fact.as_ref());
        Self {
            handle,
            type_key: schema.key(),
            fact,
            values,
            outcomes: Vec::new(),
        }
    }

    /// The fact handle.
    #[must_use]
    pub fn handle(&self) -> FactHandle {
        self.handle
    }

    /// The fact's declared type.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// The fact object.
    #[must_use]
    pub fn fact(&self) -> &Fact {
        &self.fact
    }

    /// All extracted field values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The value of one field, `Nil` if it has not been extracted.
    #[must_use]
    pub fn value(&self, slot: usize) -> &Value {
        const NIL: &Value = &Value::Nil;
        self.values.get(slot).unwrap_or(NIL)
    }

    /// Downcasts the fact object.
    #[must_use]
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.fact.downcast_ref::<T>()
    }

    /// Extracts any fields the schema declares that this record lacks.
    pub fn refresh(&mut self, schema: &TypeSchema) {
        if self.values.len() < schema.field_count() {
            schema.extract_missing(self.fact.as_ref(), &mut self.values);
        }
    }

    /// Returns the cached outcome for a condition slot.
    #[must_use]
    pub fn outcome(&self, slot: usize) -> Option<bool> {
        self.outcomes.get(slot).copied().flatten()
    }

    /// Drops cached outcomes from `slot` on.
    pub fn forget_outcomes(&mut self, slot: usize) {
        self.outcomes.truncate(slot);
    }

    /// Caches the outcome for a condition slot.
    pub fn set_outcome(&mut self, slot: usize, outcome: bool) {
        if self.outcomes.len() <= slot {
            self.outcomes.resize(slot + 1, None);
        }
        self.outcomes[slot] = Some(outcome);
    }
}

impl std::fmt::Debug for FactRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactRecord")
            .field("handle", &self.handle)
            .field("type_key", &self.type_key)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

/// Live facts of a session, keyed by handle.
#[derive(Debug, Clone)]
pub struct FactStore {
    records: IndexedMap<FactHandle, FactRecord>,
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: IndexedMap::new(),
        }
    }

    /// Creates an empty store whose index never shrinks below `min_capacity`.
    #[must_use]
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self {
            records: IndexedMap::with_min_capacity(min_capacity),
        }
    }

    /// Stores a record, returning any record it replaced.
    pub fn insert(&mut self, record: FactRecord) -> Option<FactRecord> {
        self.records.insert(record.handle, record)
    }

    /// Removes a record.
    pub fn remove(&mut self, handle: FactHandle) -> Option<FactRecord> {
        self.records.remove(&handle)
    }

    /// Returns a record.
    #[must_use]
    pub fn get(&self, handle: FactHandle) -> Option<&FactRecord> {
        self.records.get(&handle)
    }

    /// Returns a mutable record.
    pub fn get_mut(&mut self, handle: FactHandle) -> Option<&mut FactRecord> {
        self.records.get_mut(&handle)
    }

    /// Returns true if the handle is live.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Number of live facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no facts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates live facts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FactRecord> {
        self.records.values()
    }

    /// Re-extracts missing fields for every fact of one type.
    pub fn refresh_type(&mut self, schema: &TypeSchema) {
        let key = schema.key();
        self.records.for_each_mut(|_, record| {
            if record.type_key == key {
                record.refresh(schema);
            }
        });
    }
}
