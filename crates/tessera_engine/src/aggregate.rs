//! Exists / not-exists clauses.
//!
//! An aggregate asks whether a nested group of facts has at least one
//! combination for the key taken from a parent entry. Joined aggregates
//! run their own [`Network`] and keep a count of nested combinations per
//! key. Loose aggregates share no key with the parent and only ask whether
//! every nested alpha bucket is non-empty.
//!
//! Counts change while a fire cycle applies its actions. The count a key
//! had at the start of the cycle is remembered, so the rule can tell which
//! parent entries were enabled before the cycle and which are enabled
//! after it.

use std::sync::Arc;

use tessera_foundation::{FactHandle, IndexedMap, IndexedSet, KeyTuple, MemoryScope, Value};
use tessera_storage::{AlphaAddress, AlphaMemory};

use crate::beta::{EntryId, Expansion, Network, NetworkStats, Observer, Row, Tuple};

/// Polarity of an aggregate clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    /// At least one nested combination must exist.
    Exists,
    /// No nested combination may exist.
    NotExists,
}

impl AggregateKind {
    fn admits(self, present: bool) -> bool {
        match self {
            Self::Exists => present,
            Self::NotExists => !present,
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exists => write!(f, "exists"),
            Self::NotExists => write!(f, "not-exists"),
        }
    }
}

/// Which side of the current fire cycle to evaluate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum When {
    Before,
    After,
}

#[derive(Debug, Clone)]
struct JoinedState {
    network: Network,
    /// `(nested position, key slot)` per key component.
    nested_key: Box<[(usize, usize)]>,
    counts: IndexedMap<KeyTuple, usize>,
    /// Counts at the start of the cycle, for keys changed since.
    before: IndexedMap<KeyTuple, usize>,
}

impl JoinedState {
    fn count(&self, key: &KeyTuple, when: When) -> usize {
        let current = self.counts.get(key).copied().unwrap_or(0);
        match when {
            When::After => current,
            When::Before => self.before.get(key).copied().unwrap_or(current),
        }
    }

    fn adjust(&mut self, key: KeyTuple, up: bool) {
        let current = self.counts.get(&key).copied().unwrap_or(0);
        if !self.before.contains_key(&key) {
            self.before.insert(key.clone(), current);
        }
        debug_assert!(up || current > 0, "nested count underflow for {key}");
        let next = if up {
            current + 1
        } else {
            current.saturating_sub(1)
        };
        if next == 0 {
            self.counts.remove(&key);
        } else {
            self.counts.insert(key, next);
        }
    }

    fn key_of(&self, rows: &[Row]) -> KeyTuple {
        project(&self.nested_key, rows)
    }
}

#[derive(Debug, Clone)]
struct LooseState {
    addresses: Box<[AlphaAddress]>,
    before: bool,
    after: bool,
}

#[derive(Debug, Clone)]
enum Strategy {
    Joined(Box<JoinedState>),
    Loose(LooseState),
}

fn project(args: &[(usize, usize)], rows: &[Row]) -> KeyTuple {
    args.iter()
        .map(|&(index, slot)| {
            rows.get(index)
                .and_then(|row| row.get(slot))
                .cloned()
                .unwrap_or(Value::Nil)
        })
        .collect()
}

/// Runtime state of one exists / not-exists clause.
#[derive(Debug, Clone)]
pub(crate) struct AggregateNode {
    kind: AggregateKind,
    /// `(root tuple index, key slot)` per key component.
    parent_key: Box<[(usize, usize)]>,
    /// Parent root entries by key.
    parents: IndexedMap<KeyTuple, IndexedSet<EntryId>>,
    strategy: Strategy,
}

impl AggregateNode {
    pub(crate) fn joined(
        kind: AggregateKind,
        parent_key: Vec<(usize, usize)>,
        network: Network,
        nested_key: Vec<(usize, usize)>,
        min_capacity: usize,
    ) -> Self {
        Self {
            kind,
            parent_key: parent_key.into_boxed_slice(),
            parents: IndexedMap::with_min_capacity(min_capacity),
            strategy: Strategy::Joined(Box::new(JoinedState {
                network,
                nested_key: nested_key.into_boxed_slice(),
                counts: IndexedMap::with_min_capacity(min_capacity),
                before: IndexedMap::with_min_capacity(min_capacity),
            })),
        }
    }

    pub(crate) fn loose(
        kind: AggregateKind,
        addresses: Vec<AlphaAddress>,
        alpha: &AlphaMemory,
    ) -> Self {
        let mut strategy = LooseState {
            addresses: addresses.into_boxed_slice(),
            before: false,
            after: false,
        };
        strategy.after = Self::loose_present(&strategy.addresses, alpha);
        strategy.before = strategy.after;
        Self {
            kind,
            parent_key: Box::new([]),
            parents: IndexedMap::new(),
            strategy: Strategy::Loose(strategy),
        }
    }

    fn loose_present(addresses: &[AlphaAddress], alpha: &AlphaMemory) -> bool {
        addresses
            .iter()
            .all(|&a| alpha.bucket(a).is_some_and(|b| !b.is_empty()))
    }

    pub(crate) fn network(&self) -> Option<&Network> {
        match &self.strategy {
            Strategy::Joined(state) => Some(&state.network),
            Strategy::Loose(_) => None,
        }
    }

    pub(crate) fn network_mut(&mut self) -> Option<&mut Network> {
        match &mut self.strategy {
            Strategy::Joined(state) => Some(&mut state.network),
            Strategy::Loose(_) => None,
        }
    }

    pub(crate) fn stats(&self) -> Option<NetworkStats> {
        self.network().map(Network::stats)
    }

    /// Returns true if a parent root tuple passes this clause.
    pub(crate) fn admits(&self, tuple: &[Row], when: When) -> bool {
        let present = match &self.strategy {
            Strategy::Joined(state) => state.count(&project(&self.parent_key, tuple), when) > 0,
            Strategy::Loose(state) => match when {
                When::Before => state.before,
                When::After => state.after,
            },
        };
        self.kind.admits(present)
    }

    pub(crate) fn track_parent(&mut self, id: EntryId, tuple: &Tuple) {
        if matches!(self.strategy, Strategy::Loose(_)) {
            return;
        }
        let key = project(&self.parent_key, tuple);
        self.parents
            .get_or_insert_with(key, || IndexedSet::with_min_capacity(8))
            .insert(id);
    }

    pub(crate) fn forget_parent(&mut self, id: EntryId, tuple: &Tuple) {
        if matches!(self.strategy, Strategy::Loose(_)) {
            return;
        }
        let key = project(&self.parent_key, tuple);
        let emptied = self.parents.get_mut(&key).is_some_and(|ids| {
            ids.remove(&id);
            ids.is_empty()
        });
        if emptied {
            self.parents.remove(&key);
        }
    }

    /// Parent root entries whose result may have changed this cycle.
    /// `None` means every entry of the component.
    pub(crate) fn flip_candidates(&self) -> Option<Vec<EntryId>> {
        match &self.strategy {
            Strategy::Joined(state) => {
                let mut ids = Vec::new();
                for (key, &before) in &state.before {
                    let after = state.counts.get(key).copied().unwrap_or(0);
                    if (before > 0) != (after > 0) {
                        if let Some(parents) = self.parents.get(key) {
                            ids.extend(parents.iter().copied());
                        }
                    }
                }
                Some(ids)
            }
            Strategy::Loose(state) if state.before != state.after => None,
            Strategy::Loose(_) => Some(Vec::new()),
        }
    }

    pub(crate) fn insert_fact(
        &mut self,
        address: AlphaAddress,
        handle: FactHandle,
        values: &[Value],
        scope: MemoryScope,
    ) {
        if let Some(network) = self.network_mut() {
            let positions: Vec<usize> = network.positions_at(address).collect();
            for p in positions {
                network.insert_fact(p, handle, values, scope);
            }
        }
    }

    /// Removes a nested fact, dropping the counts of every `Main`
    /// combination it was part of.
    pub(crate) fn remove_fact(&mut self, address: AlphaAddress, handle: FactHandle) {
        let Strategy::Joined(state) = &mut self.strategy else {
            return;
        };
        let positions: Vec<usize> = state.network.positions_at(address).collect();
        let mut lost: Vec<KeyTuple> = Vec::new();
        let mut excluded: Vec<(usize, FactHandle)> = Vec::with_capacity(positions.len());
        for &p in &positions {
            for_each_main_containing(&state.network, p, handle, &excluded, &mut |rows, _| {
                lost.push(state.key_of(rows));
            });
            excluded.push((p, handle));
        }
        for key in lost {
            state.adjust(key, false);
        }
        for p in positions {
            state.network.remove_fact(p, handle);
        }
    }

    /// Runs the nested network's joins and counts the new combinations.
    pub(crate) fn propagate(&mut self, alpha: &AlphaMemory, observer: &mut Observer<'_>) {
        match &mut self.strategy {
            Strategy::Joined(state) => {
                state.network.compute(observer);
                let mut found: Vec<KeyTuple> = Vec::new();
                if let Some(groups) = state.network.new_groups(&[], false, &|_, _| true) {
                    state.network.for_each_new(&groups, &mut |rows, _| {
                        found.push(state.key_of(rows));
                    });
                }
                for key in found {
                    state.adjust(key, true);
                }
            }
            Strategy::Loose(state) => {
                state.after = Self::loose_present(&state.addresses, alpha);
            }
        }
    }

    /// Counts every combination already in `Main`, for a clause deployed
    /// over existing facts.
    pub(crate) fn bootstrap(&mut self, observer: &mut Observer<'_>) {
        let Strategy::Joined(state) = &mut self.strategy else {
            return;
        };
        state.network.bootstrap(observer);
        let network = &state.network;
        let lists: Vec<Vec<Tuple>> = (0..network.component_count())
            .map(|c| network.admitted(c, &|_, _| true))
            .collect();
        let mut found: Vec<KeyTuple> = Vec::new();
        network.for_each_existing(&lists, Expansion::default(), &mut |rows, _| {
            found.push(state.key_of(rows));
        });
        for key in found {
            let count = state.counts.get(&key).copied().unwrap_or(0);
            state.counts.insert(key, count + 1);
        }
    }

    pub(crate) fn has_delta(&self) -> bool {
        match &self.strategy {
            Strategy::Joined(state) => state.network.has_delta() || !state.before.is_empty(),
            Strategy::Loose(state) => state.before != state.after,
        }
    }

    pub(crate) fn commit(&mut self) {
        match &mut self.strategy {
            Strategy::Joined(state) => {
                state.network.commit();
                state.before.clear();
            }
            Strategy::Loose(state) => state.before = state.after,
        }
    }
}

/// Emits every `Main` combination of `network` holding `handle` at
/// `position`, skipping `excluded` facts.
pub(crate) fn for_each_main_containing(
    network: &Network,
    position: usize,
    handle: FactHandle,
    excluded: &[(usize, FactHandle)],
    emit: &mut dyn FnMut(&[Row], &[FactHandle]),
) {
    for_each_main_containing_where(network, position, handle, excluded, &|_, _| true, emit);
}

/// Like [`for_each_main_containing`], restricted to root entries passing
/// `admit`.
pub(crate) fn for_each_main_containing_where(
    network: &Network,
    position: usize,
    handle: FactHandle,
    excluded: &[(usize, FactHandle)],
    admit: &dyn Fn(usize, &Tuple) -> bool,
    emit: &mut dyn FnMut(&[Row], &[FactHandle]),
) {
    let entry = network.entry(position);
    let Some(row) = entry.row_of(handle).map(Arc::clone) else {
        return;
    };
    let is_main = entry
        .state(&row)
        .is_some_and(|s| s.facts(MemoryScope::Main).contains(&handle));
    if !is_main {
        return;
    }
    let own = network.component_of(position);
    let lists: Vec<Vec<Tuple>> = (0..network.component_count())
        .map(|c| {
            if c == own {
                network
                    .entries_with_row(position, &row)
                    .into_iter()
                    .filter(|(_, tuple)| admit(c, tuple))
                    .map(|(_, tuple)| tuple)
                    .collect()
            } else {
                network.admitted(c, &|_, tuple| admit(c, tuple))
            }
        })
        .collect();
    network.for_each_existing(
        &lists,
        Expansion {
            fixed: Some((position, handle)),
            excluded,
            ..Expansion::default()
        },
        emit,
    );
}
