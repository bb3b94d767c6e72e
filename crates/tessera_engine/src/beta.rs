//! Beta memory: key rows, join nodes, and combination enumeration.
//!
//! Every fact position of a rule has an [`EntryNode`] holding the key rows
//! of the facts in its alpha bucket. A key row is the [`KeyTuple`] of the
//! fields the rule reads from that position. In [`StoreMode::Keyed`] facts
//! with equal key tuples share one row, so joins run once per distinct key.
//! In [`StoreMode::Joined`] every fact gets its own row.
//!
//! Join nodes combine the rows of their sources and keep the combinations
//! that pass their beta conditions. Positions not linked by any condition
//! form separate components, and the cartesian product across components is
//! only taken when activations are enumerated.
//!
//! New combinations are found with the partition
//!
//! ```text
//! for each source i:  MAIN_0 x .. x MAIN_{i-1} x DELTA_i x ALL_{i+1} x .. x ALL_n
//! ```
//!
//! which visits every combination that involves at least one `Delta` item
//! exactly once.

use std::sync::Arc;

use tessera_foundation::{
    ByIdentity, FactHandle, HashStrategy, Identity, IndexedMap, IndexedSet, KeyTuple,
    MemoryScope, Predicate, Value,
};
use tessera_storage::AlphaAddress;

/// A key row: the projected field values of one fact position.
pub type Row = Arc<KeyTuple>;

/// Rows of several positions, in a join node's position order.
pub type Tuple = Arc<[Row]>;

/// Receives every beta condition evaluation: name, arguments, outcome.
pub(crate) type Observer<'a> = dyn FnMut(&str, &[Value], bool) + 'a;

/// How a rule stores its key rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Facts with equal key tuples share a row. Joins are computed once per
    /// distinct key and expanded to facts only when firing.
    Keyed,
    /// Every fact gets its own row, even if its key tuple equals another's.
    Joined,
}

impl HashStrategy<Row> for StoreMode {
    fn hash_key(&self, row: &Row) -> u64 {
        match self {
            Self::Keyed => row.cached_hash(),
            Self::Joined => ByIdentity::mix(row.identity()),
        }
    }

    fn same_key(&self, a: &Row, b: &Row) -> bool {
        match self {
            Self::Keyed => a == b,
            Self::Joined => Arc::ptr_eq(a, b),
        }
    }
}

/// Small sets hold the facts of one row; most rows have few.
const ROW_CAPACITY: usize = 8;

// =============================================================================
// Partitioned products
// =============================================================================

/// Calls `emit` once for every combination taking at least one item from a
/// group's second list, walking the groups as in the module docs.
pub(crate) fn for_each_partitioned<'a, T>(
    groups: &'a [(Vec<T>, Vec<T>)],
    mut emit: impl FnMut(&[&'a T]),
) {
    let n = groups.len();
    for pivot in 0..n {
        if groups[pivot].1.is_empty() {
            continue;
        }
        let lists: Vec<Vec<&'a T>> = groups
            .iter()
            .enumerate()
            .map(|(j, (old, new))| match j.cmp(&pivot) {
                std::cmp::Ordering::Less => old.iter().collect(),
                std::cmp::Ordering::Equal => new.iter().collect(),
                std::cmp::Ordering::Greater => old.iter().chain(new.iter()).collect(),
            })
            .collect();
        if lists.iter().any(Vec::is_empty) {
            continue;
        }
        cartesian(&lists, &mut Vec::with_capacity(n), &mut emit);
    }
}

/// Calls `emit` for every element of the cartesian product of `lists`.
pub(crate) fn cartesian<'a, T>(
    lists: &[Vec<&'a T>],
    current: &mut Vec<&'a T>,
    emit: &mut impl FnMut(&[&'a T]),
) {
    let depth = current.len();
    if depth == lists.len() {
        emit(current);
        return;
    }
    for &item in &lists[depth] {
        current.push(item);
        cartesian(lists, current, emit);
        current.pop();
    }
}

// =============================================================================
// Entry nodes
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct RowState {
    scope: MemoryScope,
    main: IndexedSet<FactHandle>,
    delta: IndexedSet<FactHandle>,
}

impl RowState {
    fn new(scope: MemoryScope) -> Self {
        Self {
            scope,
            main: IndexedSet::with_min_capacity(ROW_CAPACITY),
            delta: IndexedSet::with_min_capacity(ROW_CAPACITY),
        }
    }

    fn promote(&mut self) {
        self.scope = MemoryScope::Main;
        self.main.extend(self.delta.drain());
    }

    pub(crate) fn facts(&self, scope: MemoryScope) -> &IndexedSet<FactHandle> {
        match scope {
            MemoryScope::Main => &self.main,
            MemoryScope::Delta => &self.delta,
        }
    }
}

/// Outcome of removing a fact from an entry node.
#[derive(Debug, Clone)]
pub(crate) struct RowRemoval {
    pub row: Row,
    /// The row lost its last fact and was dropped.
    pub vanished: bool,
}

/// Key rows of one fact position.
#[derive(Clone, Debug)]
pub(crate) struct EntryNode {
    address: AlphaAddress,
    key_fields: Box<[usize]>,
    mode: StoreMode,
    rows: IndexedMap<Row, RowState, StoreMode>,
    main: IndexedSet<Row, StoreMode>,
    delta: IndexedSet<Row, StoreMode>,
    /// `Main` rows that received `Delta` facts this cycle.
    touched: IndexedSet<Row, StoreMode>,
    fact_rows: IndexedMap<FactHandle, Row>,
}

impl EntryNode {
    pub(crate) fn new(
        address: AlphaAddress,
        key_fields: Vec<usize>,
        mode: StoreMode,
        min_capacity: usize,
    ) -> Self {
        Self {
            address,
            key_fields: key_fields.into_boxed_slice(),
            mode,
            rows: IndexedMap::with_strategy(mode, min_capacity),
            main: IndexedSet::with_strategy(mode, min_capacity),
            delta: IndexedSet::with_strategy(mode, min_capacity),
            touched: IndexedSet::with_strategy(mode, min_capacity),
            fact_rows: IndexedMap::with_min_capacity(min_capacity),
        }
    }

    pub(crate) fn address(&self) -> AlphaAddress {
        self.address
    }

    pub(crate) fn key_fields(&self) -> &[usize] {
        &self.key_fields
    }

    fn key_of(&self, values: &[Value]) -> KeyTuple {
        self.key_fields
            .iter()
            .map(|&f| values.get(f).cloned().unwrap_or(Value::Nil))
            .collect()
    }

    /// Adds a fact. Regular inserts land in `Delta`; back-fill goes
    /// straight to `Main`.
    pub(crate) fn insert(&mut self, handle: FactHandle, values: &[Value], scope: MemoryScope) {
        let probe: Row = Arc::new(self.key_of(values));
        let existing = match self.mode {
            StoreMode::Keyed => self.rows.get_key_value(&probe).map(|(r, _)| Arc::clone(r)),
            StoreMode::Joined => None,
        };

        let row = if let Some(row) = existing {
            if let Some(state) = self.rows.get_mut(&row) {
                match scope {
                    MemoryScope::Main => {
                        state.main.insert(handle);
                    }
                    MemoryScope::Delta => {
                        state.delta.insert(handle);
                        if state.scope == MemoryScope::Main {
                            self.touched.insert(Arc::clone(&row));
                        }
                    }
                }
            }
            row
        } else {
            let mut state = RowState::new(scope);
            match scope {
                MemoryScope::Main => state.main.insert(handle),
                MemoryScope::Delta => state.delta.insert(handle),
            };
            self.rows.insert(Arc::clone(&probe), state);
            match scope {
                MemoryScope::Main => self.main.insert(Arc::clone(&probe)),
                MemoryScope::Delta => self.delta.insert(Arc::clone(&probe)),
            };
            probe
        };
        self.fact_rows.insert(handle, row);
    }

    pub(crate) fn remove(&mut self, handle: FactHandle) -> Option<RowRemoval> {
        let row = self.fact_rows.remove(&handle)?;
        let state = self.rows.get_mut(&row)?;
        if !state.main.remove(&handle) {
            state.delta.remove(&handle);
        }
        let vanished = state.main.is_empty() && state.delta.is_empty();
        let settled = state.delta.is_empty();
        if vanished {
            self.rows.remove(&row);
            self.main.remove(&row);
            self.delta.remove(&row);
            self.touched.remove(&row);
        } else if settled {
            self.touched.remove(&row);
        }
        Some(RowRemoval { row, vanished })
    }

    /// Row holding a fact.
    pub(crate) fn row_of(&self, handle: FactHandle) -> Option<&Row> {
        self.fact_rows.get(&handle)
    }

    pub(crate) fn state(&self, row: &Row) -> Option<&RowState> {
        self.rows.get(row)
    }

    pub(crate) fn touched(&self) -> &IndexedSet<Row, StoreMode> {
        &self.touched
    }

    /// Number of facts held across all rows.
    pub(crate) fn fact_count(&self) -> usize {
        self.fact_rows.len()
    }

    pub(crate) fn has_delta(&self) -> bool {
        !self.delta.is_empty() || !self.touched.is_empty()
    }

    pub(crate) fn commit(&mut self) {
        let promoted: Vec<Row> = self.delta.drain().collect();
        for row in promoted {
            if let Some(state) = self.rows.get_mut(&row) {
                state.promote();
            }
            self.main.insert(row);
        }
        let touched: Vec<Row> = self.touched.drain().collect();
        for row in touched {
            if let Some(state) = self.rows.get_mut(&row) {
                state.promote();
            }
        }
    }
}

// =============================================================================
// Join nodes
// =============================================================================

/// Where a join node reads its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Rows of a fact position.
    Entry(usize),
    /// Entries of an earlier join node.
    Join(usize),
}

/// Identifies an entry of one join node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct EntryId(u64);

#[cfg(test)]
impl EntryId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A condition over several positions, bound to a node's tuple layout.
#[derive(Clone)]
pub(crate) struct BetaCondition {
    name: Arc<str>,
    /// `(tuple index, key slot)` per predicate argument.
    args: Box<[(usize, usize)]>,
    predicate: Arc<dyn Predicate>,
}

impl BetaCondition {
    fn test(&self, tuple: &[Row], observer: &mut Observer<'_>) -> bool {
        let values: Vec<Value> = self
            .args
            .iter()
            .map(|&(index, slot)| {
                tuple
                    .get(index)
                    .and_then(|row| row.get(slot))
                    .cloned()
                    .unwrap_or(Value::Nil)
            })
            .collect();
        let outcome = self.predicate.test(&values);
        observer(&self.name, &values, outcome);
        outcome
    }
}

impl std::fmt::Debug for BetaCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BetaCondition")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Combinations of rows that passed a set of beta conditions.
#[derive(Clone, Debug)]
pub(crate) struct JoinNode {
    positions: Box<[usize]>,
    sources: Box<[Source]>,
    conditions: Vec<BetaCondition>,
    main: IndexedMap<EntryId, Tuple>,
    delta: IndexedMap<EntryId, Tuple>,
    /// Entries by the row they hold, one index per tuple slot.
    back: Box<[IndexedMap<Row, IndexedSet<EntryId>, StoreMode>]>,
    next_id: u64,
}

impl JoinNode {
    fn new(
        positions: Vec<usize>,
        sources: Vec<Source>,
        mode: StoreMode,
        min_capacity: usize,
    ) -> Self {
        let back = positions
            .iter()
            .map(|_| IndexedMap::with_strategy(mode, min_capacity))
            .collect();
        Self {
            positions: positions.into_boxed_slice(),
            sources: sources.into_boxed_slice(),
            conditions: Vec::new(),
            main: IndexedMap::with_min_capacity(min_capacity),
            delta: IndexedMap::with_min_capacity(min_capacity),
            back,
            next_id: 0,
        }
    }

    /// Tuple slot of a rule position.
    pub(crate) fn index_of(&self, position: usize) -> Option<usize> {
        self.positions.iter().position(|&p| p == position)
    }

    pub(crate) fn entries(&self, scope: MemoryScope) -> &IndexedMap<EntryId, Tuple> {
        match scope {
            MemoryScope::Main => &self.main,
            MemoryScope::Delta => &self.delta,
        }
    }

    /// Entries holding `row` at tuple slot `index`.
    pub(crate) fn entries_with(&self, index: usize, row: &Row) -> Vec<EntryId> {
        self.back
            .get(index)
            .and_then(|b| b.get(row))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn add(&mut self, tuple: Tuple, scope: MemoryScope, min_capacity: usize) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        for (index, row) in tuple.iter().enumerate() {
            self.back[index]
                .get_or_insert_with(Arc::clone(row), || {
                    IndexedSet::with_min_capacity(min_capacity.min(ROW_CAPACITY))
                })
                .insert(id);
        }
        match scope {
            MemoryScope::Main => self.main.insert(id, tuple),
            MemoryScope::Delta => self.delta.insert(id, tuple),
        };
        id
    }

    /// Drops every entry holding `row` at tuple slot `index`.
    fn remove_row(&mut self, index: usize, row: &Row) -> Vec<(EntryId, Tuple)> {
        let Some(ids) = self.back.get_mut(index).and_then(|b| b.remove(row)) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids.iter().copied() {
            let Some(tuple) = self.main.remove(&id).or_else(|| self.delta.remove(&id)) else {
                continue;
            };
            for (other, other_row) in tuple.iter().enumerate() {
                if other == index {
                    continue;
                }
                let back = &mut self.back[other];
                let emptied = back.get_mut(other_row).is_some_and(|set| {
                    set.remove(&id);
                    set.is_empty()
                });
                if emptied {
                    back.remove(other_row);
                }
            }
            removed.push((id, tuple));
        }
        removed
    }

    fn commit(&mut self) {
        let merged: Vec<(EntryId, Tuple)> = self.delta.drain().collect();
        self.main.extend(merged);
    }
}

// =============================================================================
// Network
// =============================================================================

/// Description of a fact position used to build a [`Network`].
#[derive(Debug, Clone)]
pub(crate) struct PositionSpec {
    pub address: AlphaAddress,
    /// Field slots projected into the key row, sorted.
    pub key_fields: Vec<usize>,
}

/// A beta condition in rule terms: `(position, field slot)` per argument.
#[derive(Clone)]
pub(crate) struct ConditionSpec {
    pub name: Arc<str>,
    pub args: Vec<(usize, usize)>,
    pub predicate: Arc<dyn Predicate>,
}

/// An entry chosen for enumeration.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub tuple: Tuple,
    /// No combination of this entry has been emitted yet.
    pub fresh: bool,
}

/// Restricts which facts expand a row.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Expansion<'a> {
    /// Include `Delta` facts and only emit combinations with at least one.
    pub new_only: bool,
    /// Include `Delta` facts and emit everything.
    pub everything: bool,
    /// Pin one position to a single fact.
    pub fixed: Option<(usize, FactHandle)>,
    /// Facts to skip at given positions.
    pub excluded: &'a [(usize, FactHandle)],
}

/// Occupancy of one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Per position: `(main rows, delta rows, facts)`.
    pub rows: Vec<(usize, usize, usize)>,
    /// Per join node: `(main entries, delta entries)`.
    pub entries: Vec<(usize, usize)>,
}

impl NetworkStats {
    /// Returns true if no node holds `Delta` state.
    #[must_use]
    pub fn delta_is_empty(&self) -> bool {
        self.rows.iter().all(|&(_, d, _)| d == 0) && self.entries.iter().all(|&(_, d)| d == 0)
    }
}

/// The entry nodes and join nodes of one group of fact positions.
#[derive(Clone, Debug)]
pub(crate) struct Network {
    min_capacity: usize,
    entries: Vec<EntryNode>,
    joins: Vec<JoinNode>,
    /// Root join node of each component.
    components: Vec<usize>,
    /// `(component, tuple slot)` of each position.
    slots: Vec<(usize, usize)>,
}

impl Network {
    /// Builds the join graph.
    ///
    /// Conditions link positions in declaration order. `groups` lists
    /// position sets that must end up in one component even without a
    /// linking condition; they are joined by plain cross products.
    pub(crate) fn build(
        mode: StoreMode,
        positions: Vec<PositionSpec>,
        conditions: &[ConditionSpec],
        groups: &[Vec<usize>],
        min_capacity: usize,
    ) -> Self {
        let entries: Vec<EntryNode> = positions
            .into_iter()
            .map(|p| EntryNode::new(p.address, p.key_fields, mode, min_capacity))
            .collect();
        let mut network = Self {
            min_capacity,
            entries,
            joins: Vec::new(),
            components: Vec::new(),
            slots: Vec::new(),
        };

        // (root, covered positions) per group, indexed by position.
        let mut roots: Vec<Source> = (0..network.entries.len()).map(Source::Entry).collect();
        let mut members: Vec<Vec<usize>> = (0..network.entries.len()).map(|p| vec![p]).collect();
        let mut group_of: Vec<usize> = (0..network.entries.len()).collect();

        let links = conditions
            .iter()
            .map(|c| (c.args.iter().map(|&(p, _)| p).collect::<Vec<_>>(), Some(c)))
            .chain(groups.iter().map(|g| (g.clone(), None)));

        for (linked, condition) in links {
            let mut touched: Vec<usize> = Vec::new();
            for p in linked {
                let Some(&g) = group_of.get(p) else { continue };
                if !touched.contains(&g) {
                    touched.push(g);
                }
            }
            let Some(&first) = touched.first() else {
                continue;
            };

            let join = if touched.len() == 1 {
                match roots[first] {
                    Source::Join(j) => Some(j),
                    Source::Entry(_) => None,
                }
            } else {
                let covered: Vec<usize> =
                    touched.iter().flat_map(|&g| members[g].clone()).collect();
                let sources: Vec<Source> = touched.iter().map(|&g| roots[g]).collect();
                let j = network.joins.len();
                network
                    .joins
                    .push(JoinNode::new(covered.clone(), sources, mode, min_capacity));
                for &g in &touched[1..] {
                    for &p in &members[g] {
                        group_of[p] = first;
                    }
                    members[g].clear();
                }
                members[first] = covered;
                roots[first] = Source::Join(j);
                Some(j)
            };

            if let (Some(j), Some(condition)) = (join, condition) {
                let node = &mut network.joins[j];
                let args = condition
                    .args
                    .iter()
                    .map(|&(p, field)| {
                        let index = node.index_of(p).unwrap_or(usize::MAX);
                        let slot = network.entries[p]
                            .key_fields()
                            .binary_search(&field)
                            .unwrap_or(usize::MAX);
                        (index, slot)
                    })
                    .collect();
                node.conditions.push(BetaCondition {
                    name: Arc::clone(&condition.name),
                    args,
                    predicate: Arc::clone(&condition.predicate),
                });
            }
        }

        // Every component gets a join node as its root, so that entries
        // have ids and back indices even for a single loose position.
        network.slots = vec![(0, 0); network.entries.len()];
        for g in 0..members.len() {
            if members[g].is_empty() || group_of[members[g][0]] != g {
                continue;
            }
            let root = match roots[g] {
                Source::Join(j) => j,
                Source::Entry(p) => {
                    let j = network.joins.len();
                    network.joins.push(JoinNode::new(
                        vec![p],
                        vec![Source::Entry(p)],
                        mode,
                        min_capacity,
                    ));
                    j
                }
            };
            let component = network.components.len();
            for (index, &p) in network.joins[root].positions.iter().enumerate() {
                network.slots[p] = (component, index);
            }
            network.components.push(root);
        }
        network
    }

    pub(crate) fn position_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entry(&self, position: usize) -> &EntryNode {
        &self.entries[position]
    }

    /// Positions reading from an alpha bucket.
    pub(crate) fn positions_at(&self, address: AlphaAddress) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.address == address)
            .map(|(p, _)| p)
    }

    pub(crate) fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn component_of(&self, position: usize) -> usize {
        self.slots[position].0
    }

    pub(crate) fn root(&self, component: usize) -> &JoinNode {
        &self.joins[self.components[component]]
    }

    pub(crate) fn insert_fact(
        &mut self,
        position: usize,
        handle: FactHandle,
        values: &[Value],
        scope: MemoryScope,
    ) {
        self.entries[position].insert(handle, values, scope);
    }

    /// Removes a fact from one position. If its row vanished, every entry
    /// holding the row is dropped; removed root entries are returned with
    /// their component.
    pub(crate) fn remove_fact(
        &mut self,
        position: usize,
        handle: FactHandle,
    ) -> (Option<RowRemoval>, Vec<(usize, EntryId, Tuple)>) {
        let Some(removal) = self.entries[position].remove(handle) else {
            return (None, Vec::new());
        };
        let mut dropped = Vec::new();
        if removal.vanished {
            let (component, _) = self.slots[position];
            let root = self.components[component];
            for (j, node) in self.joins.iter_mut().enumerate() {
                let Some(index) = node.index_of(position) else {
                    continue;
                };
                let removed = node.remove_row(index, &removal.row);
                if j == root {
                    dropped.extend(removed.into_iter().map(|(id, t)| (component, id, t)));
                }
            }
        }
        (Some(removal), dropped)
    }

    fn source_tuples(&self, source: Source) -> (Vec<Tuple>, Vec<Tuple>) {
        match source {
            Source::Entry(p) => {
                let entry = &self.entries[p];
                let wrap = |row: &Row| -> Tuple { Arc::from(vec![Arc::clone(row)]) };
                (
                    entry.main.iter().map(wrap).collect(),
                    entry.delta.iter().map(wrap).collect(),
                )
            }
            Source::Join(j) => {
                let node = &self.joins[j];
                (
                    node.main.values().cloned().collect(),
                    node.delta.values().cloned().collect(),
                )
            }
        }
    }

    fn source_has_delta(&self, source: Source) -> bool {
        match source {
            Source::Entry(p) => !self.entries[p].delta.is_empty(),
            Source::Join(j) => !self.joins[j].delta.is_empty(),
        }
    }

    /// Propagates `Delta` rows through every join node. Returns the new
    /// root entries with their component.
    pub(crate) fn compute(&mut self, observer: &mut Observer<'_>) -> Vec<(usize, EntryId, Tuple)> {
        self.propagate(false, observer)
    }

    /// Joins everything already in `Main` into `Main`, for a network
    /// deployed over existing facts.
    pub(crate) fn bootstrap(&mut self, observer: &mut Observer<'_>) -> Vec<(usize, EntryId, Tuple)> {
        self.propagate(true, observer)
    }

    fn propagate(
        &mut self,
        bootstrap: bool,
        observer: &mut Observer<'_>,
    ) -> Vec<(usize, EntryId, Tuple)> {
        let mut created = Vec::new();
        let target = if bootstrap {
            MemoryScope::Main
        } else {
            MemoryScope::Delta
        };
        for j in 0..self.joins.len() {
            let sources = self.joins[j].sources.clone();
            if !bootstrap && !sources.iter().any(|&s| self.source_has_delta(s)) {
                continue;
            }
            let inputs: Vec<(Vec<Tuple>, Vec<Tuple>)> = sources
                .iter()
                .map(|&s| {
                    let (main, delta) = self.source_tuples(s);
                    if bootstrap {
                        (Vec::new(), main)
                    } else {
                        (main, delta)
                    }
                })
                .collect();

            let conditions = &self.joins[j].conditions;
            let mut accepted: Vec<Tuple> = Vec::new();
            for_each_partitioned(&inputs, |parts| {
                let tuple: Tuple = parts.iter().flat_map(|t| t.iter().cloned()).collect();
                if conditions.iter().all(|c| c.test(&tuple, observer)) {
                    accepted.push(tuple);
                }
            });

            let component = self.components.iter().position(|&root| root == j);
            let min_capacity = self.min_capacity;
            let node = &mut self.joins[j];
            for tuple in accepted {
                let id = node.add(Arc::clone(&tuple), target, min_capacity);
                if let Some(component) = component {
                    created.push((component, id, tuple));
                }
            }
        }
        created
    }

    pub(crate) fn commit(&mut self) {
        for entry in &mut self.entries {
            entry.commit();
        }
        for node in &mut self.joins {
            node.commit();
        }
    }

    pub(crate) fn has_delta(&self) -> bool {
        self.entries.iter().any(EntryNode::has_delta) || self.joins.iter().any(|j| !j.delta.is_empty())
    }

    pub(crate) fn stats(&self) -> NetworkStats {
        NetworkStats {
            rows: self
                .entries
                .iter()
                .map(|e| (e.main.len(), e.delta.len(), e.fact_count()))
                .collect(),
            entries: self
                .joins
                .iter()
                .map(|j| (j.main.len(), j.delta.len()))
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Enumeration
    // -------------------------------------------------------------------------

    /// Root entries of a component that hold one of the component's
    /// touched rows, `Main` only.
    pub(crate) fn touched_entries(&self, component: usize) -> Vec<EntryId> {
        let root = self.root(component);
        let mut found: Vec<EntryId> = Vec::new();
        for (index, &p) in root.positions.iter().enumerate() {
            for row in self.entries[p].touched().iter() {
                for id in root.entries_with(index, row) {
                    if root.main.contains_key(&id) && !found.contains(&id) {
                        found.push(id);
                    }
                }
            }
        }
        found
    }

    /// Main root entries of a component holding `row` at `position`.
    pub(crate) fn entries_with_row(&self, position: usize, row: &Row) -> Vec<(EntryId, Tuple)> {
        let (component, index) = self.slots[position];
        let root = self.root(component);
        root.entries_with(index, row)
            .into_iter()
            .filter_map(|id| root.main.get(&id).map(|t| (id, Arc::clone(t))))
            .collect()
    }

    /// Splits each component's root entries into clean and dirty
    /// candidates for [`Network::for_each_new`].
    ///
    /// Dirty entries are the `Delta` entries, the `Main` entries listed in
    /// `fresh`, and `Main` entries holding a touched row. With `all_fresh`
    /// every entry is dirty and fresh. Entries failing `admit` are left
    /// out. Returns `None` if no component has a dirty entry.
    pub(crate) fn new_groups(
        &self,
        fresh: &[IndexedSet<EntryId>],
        all_fresh: bool,
        admit: &dyn Fn(usize, &Tuple) -> bool,
    ) -> Option<Vec<(Vec<Candidate>, Vec<Candidate>)>> {
        let candidate = |tuple: &Tuple, fresh: bool| Candidate {
            tuple: Arc::clone(tuple),
            fresh,
        };
        let multi = self.components.len() > 1;
        let mut any_dirty = false;
        let mut groups = Vec::with_capacity(self.components.len());

        for c in 0..self.components.len() {
            let root = self.root(c);
            let mut dirty: Vec<Candidate> = root
                .delta
                .iter()
                .filter(|(_, tuple)| admit(c, tuple))
                .map(|(_, tuple)| candidate(tuple, true))
                .collect();
            let mut dirty_ids: IndexedSet<EntryId> = IndexedSet::new();

            if all_fresh {
                dirty.extend(
                    root.main
                        .iter()
                        .filter(|(_, tuple)| admit(c, tuple))
                        .map(|(_, tuple)| candidate(tuple, true)),
                );
            } else {
                for &id in fresh.get(c).into_iter().flat_map(IndexedSet::iter) {
                    if let Some(tuple) = root.main.get(&id) {
                        if admit(c, tuple) && dirty_ids.insert(id) {
                            dirty.push(candidate(tuple, true));
                        }
                    }
                }
                for id in self.touched_entries(c) {
                    if dirty_ids.contains(&id) {
                        continue;
                    }
                    if let Some(tuple) = root.main.get(&id) {
                        if admit(c, tuple) {
                            dirty_ids.insert(id);
                            dirty.push(candidate(tuple, false));
                        }
                    }
                }
            }

            let clean = if multi && !all_fresh {
                root.main
                    .iter()
                    .filter(|(id, tuple)| !dirty_ids.contains(id) && admit(c, tuple))
                    .map(|(_, tuple)| candidate(tuple, false))
                    .collect()
            } else {
                Vec::new()
            };
            any_dirty |= !dirty.is_empty();
            groups.push((clean, dirty));
        }
        any_dirty.then_some(groups)
    }

    /// `Main` root entries of a component that pass `admit`.
    pub(crate) fn admitted(
        &self,
        component: usize,
        admit: &dyn Fn(&EntryId, &Tuple) -> bool,
    ) -> Vec<Tuple> {
        self.root(component)
            .main
            .iter()
            .filter(|(id, tuple)| admit(id, tuple))
            .map(|(_, tuple)| Arc::clone(tuple))
            .collect()
    }

    fn assemble(&self, tuples: &[&Tuple]) -> Vec<Row> {
        self.slots
            .iter()
            .map(|&(component, index)| Arc::clone(&tuples[component][index]))
            .collect()
    }

    /// Emits new fact combinations. `groups` holds, per component, the
    /// clean entries and the dirty ones (fresh or touched).
    pub(crate) fn for_each_new(
        &self,
        groups: &[(Vec<Candidate>, Vec<Candidate>)],
        emit: &mut dyn FnMut(&[Row], &[FactHandle]),
    ) {
        for_each_partitioned(groups, |picked| {
            let tuples: Vec<&Tuple> = picked.iter().map(|c| &c.tuple).collect();
            let rows = self.assemble(&tuples);
            let fresh = picked.iter().any(|c| c.fresh);
            let expansion = if fresh {
                Expansion {
                    everything: true,
                    ..Expansion::default()
                }
            } else {
                Expansion {
                    new_only: true,
                    ..Expansion::default()
                }
            };
            self.expand(&rows, expansion, emit);
        });
    }

    /// Emits every `Main` fact combination over the given entries.
    pub(crate) fn for_each_existing(
        &self,
        lists: &[Vec<Tuple>],
        expansion: Expansion<'_>,
        emit: &mut dyn FnMut(&[Row], &[FactHandle]),
    ) {
        let refs: Vec<Vec<&Tuple>> = lists.iter().map(|l| l.iter().collect()).collect();
        if refs.iter().any(Vec::is_empty) {
            return;
        }
        cartesian(&refs, &mut Vec::with_capacity(refs.len()), &mut |picked| {
            let rows = self.assemble(picked);
            self.expand(&rows, expansion, emit);
        });
    }

    fn expand(
        &self,
        rows: &[Row],
        expansion: Expansion<'_>,
        emit: &mut dyn FnMut(&[Row], &[FactHandle]),
    ) {
        let with_delta = expansion.new_only || expansion.everything;
        let mut lists: Vec<Vec<(FactHandle, bool)>> = Vec::with_capacity(rows.len());
        for (p, row) in rows.iter().enumerate() {
            if let Some((fixed, handle)) = expansion.fixed {
                if fixed == p {
                    lists.push(vec![(handle, false)]);
                    continue;
                }
            }
            let Some(state) = self.entries[p].state(row) else {
                return;
            };
            let mut facts: Vec<(FactHandle, bool)> = state
                .main
                .iter()
                .filter(|&&h| !expansion.excluded.contains(&(p, h)))
                .map(|&h| (h, false))
                .collect();
            if with_delta {
                facts.extend(state.delta.iter().map(|&h| (h, true)));
            }
            if facts.is_empty() {
                return;
            }
            lists.push(facts);
        }
        let mut handles = Vec::with_capacity(rows.len());
        expand_facts(&lists, &mut handles, 0, expansion.new_only, rows, emit);
    }
}

fn expand_facts(
    lists: &[Vec<(FactHandle, bool)>],
    current: &mut Vec<FactHandle>,
    delta_count: usize,
    new_only: bool,
    rows: &[Row],
    emit: &mut dyn FnMut(&[Row], &[FactHandle]),
) {
    let depth = current.len();
    if depth == lists.len() {
        if !new_only || delta_count > 0 {
            emit(rows, current);
        }
        return;
    }
    for &(handle, is_delta) in &lists[depth] {
        current.push(handle);
        expand_facts(
            lists,
            current,
            delta_count + usize::from(is_delta),
            new_only,
            rows,
            emit,
        );
        current.pop();
    }
}
