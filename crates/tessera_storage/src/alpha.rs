//! Alpha memory: per-type buckets of facts passing single-fact conditions.
//!
//! An alpha condition tests fields of one fact. A bucket is identified by
//! an [`AlphaAddress`] and defined by a set of conditions that must all
//! hold. Every bucket keeps its members split into `Main` and `Delta`
//! scopes. Condition outcomes are cached on the fact record, so each
//! condition runs at most once per fact no matter how many buckets share
//! it.
//!
//! Buckets added while facts already exist are back-filled from that
//! type's facts only. Existing buckets and their contents are never
//! renumbered.

use std::sync::Arc;

use tessera_foundation::{
    ByIdentity, FactHandle, IndexedMap, IndexedSet, MemoryScope, Predicate, Value,
};

use crate::facts::{FactRecord, FactStore};
use crate::schema::{TypeKey, TypeSchema};

/// Identifies a registered alpha condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlphaConditionId(u32);

impl AlphaConditionId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies a bucket within a type's alpha memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlphaAddress {
    /// The fact type.
    pub type_key: TypeKey,
    /// Bucket position within the type.
    pub index: u32,
}

/// A condition over the fields of a single fact.
#[derive(Clone)]
pub struct AlphaCondition {
    id: AlphaConditionId,
    type_key: TypeKey,
    fields: Box<[usize]>,
    predicate: Arc<dyn Predicate>,
    name: Arc<str>,
    /// Position of this condition's outcome in each fact's cache.
    slot: usize,
}

impl AlphaCondition {
    /// The condition id.
    #[must_use]
    pub fn id(&self) -> AlphaConditionId {
        self.id
    }

    /// The fact type the condition applies to.
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Field slots passed to the predicate, in order.
    #[must_use]
    pub fn fields(&self) -> &[usize] {
        &self.fields
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the condition, consulting the record's cache first.
    ///
    /// `observer` sees every fresh evaluation.
    pub fn evaluate(
        &self,
        record: &mut FactRecord,
        observer: &mut dyn FnMut(&AlphaCondition, &[Value], bool),
    ) -> bool {
        if let Some(outcome) = record.outcome(self.slot) {
            return outcome;
        }
        let values: Vec<Value> = self
            .fields
            .iter()
            .map(|&slot| record.value(slot).clone())
            .collect();
        let outcome = self.predicate.test(&values);
        observer(self, &values, outcome);
        record.set_outcome(self.slot, outcome);
        outcome
    }
}

impl std::fmt::Debug for AlphaCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaCondition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Facts of one type that pass a fixed set of conditions.
#[derive(Debug, Clone)]
pub struct AlphaBucket {
    address: AlphaAddress,
    conditions: Box<[AlphaConditionId]>,
    main: IndexedSet<FactHandle>,
    delta: IndexedSet<FactHandle>,
}

impl AlphaBucket {
    fn new(address: AlphaAddress, conditions: Box<[AlphaConditionId]>, min_capacity: usize) -> Self {
        Self {
            address,
            conditions,
            main: IndexedSet::with_min_capacity(min_capacity),
            delta: IndexedSet::with_min_capacity(min_capacity),
        }
    }

    /// The bucket's address.
    #[must_use]
    pub fn address(&self) -> AlphaAddress {
        self.address
    }

    /// Conditions that define membership, sorted.
    #[must_use]
    pub fn conditions(&self) -> &[AlphaConditionId] {
        &self.conditions
    }

    /// Members in one scope.
    #[must_use]
    pub fn scope(&self, scope: MemoryScope) -> &IndexedSet<FactHandle> {
        match scope {
            MemoryScope::Main => &self.main,
            MemoryScope::Delta => &self.delta,
        }
    }

    /// Total members across both scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.main.len() + self.delta.len()
    }

    /// Returns true if the bucket has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.delta.is_empty()
    }

    /// Returns true if the fact is a member in either scope.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.main.contains(&handle) || self.delta.contains(&handle)
    }
}

/// Registration counts captured by [`AlphaMemory::checkpoint`].
#[derive(Debug, Clone)]
pub struct AlphaCheckpoint {
    conditions: usize,
    /// Per type: `(conditions, buckets)`.
    types: Vec<(usize, usize)>,
}

/// Occupancy of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketStats {
    /// The bucket.
    pub address: AlphaAddress,
    /// Members in `Main`.
    pub main: usize,
    /// Members in `Delta`.
    pub delta: usize,
}

#[derive(Debug, Clone)]
struct TypeMemory {
    /// Conditions of this type, by cache slot.
    conditions: Vec<AlphaConditionId>,
    buckets: Vec<AlphaBucket>,
    facts: IndexedSet<FactHandle>,
}

impl TypeMemory {
    fn new(min_capacity: usize) -> Self {
        Self {
            conditions: Vec::new(),
            buckets: Vec::new(),
            facts: IndexedSet::with_min_capacity(min_capacity),
        }
    }
}

/// Alpha memory of a session.
#[derive(Clone)]
pub struct AlphaMemory {
    conditions: Vec<AlphaCondition>,
    /// Registered conditions by predicate identity, for sharing.
    by_predicate: IndexedMap<Arc<dyn Predicate>, Vec<AlphaConditionId>, ByIdentity>,
    types: Vec<TypeMemory>,
    min_capacity: usize,
}

impl AlphaMemory {
    /// Creates an empty alpha memory.
    #[must_use]
    pub fn new(min_capacity: usize) -> Self {
        Self {
            conditions: Vec::new(),
            by_predicate: IndexedMap::new(),
            types: Vec::new(),
            min_capacity,
        }
    }

    fn memory_mut(&mut self, type_key: TypeKey) -> &mut TypeMemory {
        let index = type_key.index();
        if self.types.len() <= index {
            let min_capacity = self.min_capacity;
            self.types
                .resize_with(index + 1, || TypeMemory::new(min_capacity));
        }
        &mut self.types[index]
    }

    /// Registers a condition, reusing an existing one with the same
    /// predicate object and field list.
    pub fn register_condition(
        &mut self,
        type_key: TypeKey,
        fields: Vec<usize>,
        predicate: Arc<dyn Predicate>,
        name: impl Into<Arc<str>>,
    ) -> AlphaConditionId {
        if let Some(ids) = self.by_predicate.get(&predicate) {
            let existing = ids.iter().copied().find(|id| {
                let c = &self.conditions[id.index()];
                c.type_key == type_key && *c.fields == *fields
            });
            if let Some(id) = existing {
                return id;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = AlphaConditionId(self.conditions.len() as u32);
        let memory = self.memory_mut(type_key);
        let slot = memory.conditions.len();
        memory.conditions.push(id);
        self.conditions.push(AlphaCondition {
            id,
            type_key,
            fields: fields.into_boxed_slice(),
            predicate: Arc::clone(&predicate),
            name: name.into(),
            slot,
        });
        self.by_predicate
            .get_or_insert_with(predicate, Vec::new)
            .push(id);
        id
    }

    /// Captures the registered conditions and buckets so a failed rule
    /// deployment can be undone with [`AlphaMemory::rollback`].
    #[must_use]
    pub fn checkpoint(&self) -> AlphaCheckpoint {
        AlphaCheckpoint {
            conditions: self.conditions.len(),
            types: self
                .types
                .iter()
                .map(|m| (m.conditions.len(), m.buckets.len()))
                .collect(),
        }
    }

    /// Drops every condition and bucket registered since `checkpoint`,
    /// along with the outcomes facts cached for them. Fact membership is
    /// not part of a checkpoint: no facts may be inserted or removed in
    /// between.
    pub fn rollback(&mut self, checkpoint: &AlphaCheckpoint, facts: &mut FactStore) {
        for condition in self.conditions.drain(checkpoint.conditions.min(self.conditions.len())..) {
            let emptied = self.by_predicate.get_mut(&condition.predicate).is_some_and(|ids| {
                ids.retain(|&id| id != condition.id);
                ids.is_empty()
            });
            if emptied {
                self.by_predicate.remove(&condition.predicate);
            }
        }

        for (index, memory) in self.types.iter_mut().enumerate() {
            let (conditions, buckets) = checkpoint.types.get(index).copied().unwrap_or((0, 0));
            if memory.conditions.len() > conditions {
                memory.conditions.truncate(conditions);
                for handle in memory.facts.iter() {
                    if let Some(record) = facts.get_mut(*handle) {
                        record.forget_outcomes(conditions);
                    }
                }
            }
            memory.buckets.truncate(buckets);
        }
        tracing::debug!(conditions = self.conditions.len(), "rolled back alpha memory");
    }

    /// Returns a registered condition.
    #[must_use]
    pub fn condition(&self, id: AlphaConditionId) -> Option<&AlphaCondition> {
        self.conditions.get(id.index())
    }

    /// Returns the bucket for a set of conditions, creating it if needed.
    ///
    /// A new bucket is back-filled into `Main` from the type's current
    /// facts. The second value reports whether the bucket was created.
    pub fn address_for(
        &mut self,
        schema: &TypeSchema,
        conditions: &[AlphaConditionId],
        facts: &mut FactStore,
        observer: &mut dyn FnMut(&AlphaCondition, &[Value], bool),
    ) -> (AlphaAddress, bool) {
        let type_key = schema.key();
        let mut wanted: Vec<AlphaConditionId> = conditions.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let min_capacity = self.min_capacity;
        self.memory_mut(type_key);
        let memory = &mut self.types[type_key.index()];
        if let Some(bucket) = memory.buckets.iter().find(|b| *b.conditions == *wanted) {
            return (bucket.address, false);
        }

        #[allow(clippy::cast_possible_truncation)]
        let address = AlphaAddress {
            type_key,
            index: memory.buckets.len() as u32,
        };
        let mut bucket = AlphaBucket::new(address, wanted.into_boxed_slice(), min_capacity);

        let members: Vec<FactHandle> = memory.facts.iter().copied().collect();
        let registered = &self.conditions;
        for handle in members {
            let Some(record) = facts.get_mut(handle) else {
                continue;
            };
            record.refresh(schema);
            let pass = bucket
                .conditions
                .iter()
                .all(|id| registered[id.index()].evaluate(record, observer));
            if pass {
                bucket.main.insert(handle);
            }
        }
        tracing::debug!(
            type_name = schema.name(),
            bucket = address.index,
            backfilled = bucket.main.len(),
            "created alpha bucket"
        );
        memory.buckets.push(bucket);
        (address, true)
    }

    /// Places a new fact into `Delta` of every bucket whose conditions it
    /// passes. Returns those buckets.
    pub fn insert(
        &mut self,
        record: &mut FactRecord,
        observer: &mut dyn FnMut(&AlphaCondition, &[Value], bool),
    ) -> Vec<AlphaAddress> {
        let handle = record.handle();
        self.memory_mut(record.type_key());
        let registered = &self.conditions;
        let memory = &mut self.types[record.type_key().index()];
        memory.facts.insert(handle);

        let mut matched = Vec::new();
        for bucket in &mut memory.buckets {
            let pass = bucket
                .conditions
                .iter()
                .all(|id| registered[id.index()].evaluate(record, observer));
            if pass {
                bucket.delta.insert(handle);
                matched.push(bucket.address);
            }
        }
        matched
    }

    /// Removes a fact from every bucket of its type. Returns the buckets it
    /// was in, with the scope it was found in.
    pub fn remove(
        &mut self,
        type_key: TypeKey,
        handle: FactHandle,
    ) -> Vec<(AlphaAddress, MemoryScope)> {
        let Some(memory) = self.types.get_mut(type_key.index()) else {
            return Vec::new();
        };
        memory.facts.remove(&handle);
        let mut removed = Vec::new();
        for bucket in &mut memory.buckets {
            if bucket.main.remove(&handle) {
                removed.push((bucket.address, MemoryScope::Main));
            } else if bucket.delta.remove(&handle) {
                removed.push((bucket.address, MemoryScope::Delta));
            }
        }
        removed
    }

    /// Returns a bucket.
    #[must_use]
    pub fn bucket(&self, address: AlphaAddress) -> Option<&AlphaBucket> {
        self.types
            .get(address.type_key.index())?
            .buckets
            .get(address.index as usize)
    }

    /// Iterates all live facts of one type.
    pub fn facts_of(&self, type_key: TypeKey) -> impl Iterator<Item = FactHandle> + '_ {
        self.types
            .get(type_key.index())
            .into_iter()
            .flat_map(|m| m.facts.iter().copied())
    }

    /// Merges every bucket's `Delta` into `Main`.
    pub fn commit(&mut self) {
        for memory in &mut self.types {
            for bucket in &mut memory.buckets {
                let AlphaBucket { main, delta, .. } = bucket;
                main.extend(delta.drain());
            }
        }
    }

    /// Returns true if any bucket has `Delta` members.
    #[must_use]
    pub fn has_delta(&self) -> bool {
        self.types
            .iter()
            .flat_map(|m| m.buckets.iter())
            .any(|b| !b.delta.is_empty())
    }

    /// Occupancy of every bucket.
    #[must_use]
    pub fn stats(&self) -> Vec<BucketStats> {
        self.types
            .iter()
            .flat_map(|m| m.buckets.iter())
            .map(|b| BucketStats {
                address: b.address,
                main: b.main.len(),
                delta: b.delta.len(),
            })
            .collect()
    }
}

impl Default for AlphaMemory {
    fn default() -> Self {
        Self::new(tessera_foundation::DEFAULT_MIN_CAPACITY)
    }
}

impl std::fmt::Debug for AlphaMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaMemory")
            .field("conditions", &self.conditions)
            .field("buckets", &self.stats())
            .finish_non_exhaustive()
    }
}
