//! Open-addressing hash index with lazy deletion.
//!
//! [`IndexedMap`] is the storage primitive behind every memory in the
//! engine. It uses linear probing over a power-of-two table and keeps
//! insertion order in a side list of slot positions, so iteration is
//! deterministic and removals during iteration are O(1).
//!
//! Removal marks a slot as deleted but keeps its key. A later insert of an
//! equal key revives the slot in place. Tombstones are purged by
//! [`IndexedMap::resize`], which every structural mutation calls first:
//!
//! - grow x2 when live entries exceed 3/4 of the capacity
//! - shrink when live entries fall below 3/16 of the capacity, never below
//!   the configured floor
//! - rebuild at the same size when tombstones outnumber live entries, or
//!   when live plus deleted slots exceed 3/4 of the capacity
//!
//! The last rule guarantees that the table always holds an empty slot, so
//! every probe terminates.
//!
//! Two hashing strategies share this algorithm: [`ByValue`] hashes keys by
//! their `Hash`/`Eq` implementations and [`ByIdentity`] by the address of a
//! shared allocation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// Smallest table the index will ever allocate.
pub const MINIMUM_CAPACITY: usize = 8;

/// Default floor used by [`IndexedMap::new`].
pub const DEFAULT_MIN_CAPACITY: usize = 16;

// =============================================================================
// Hash strategies
// =============================================================================

/// How keys are hashed and compared.
///
/// The strategy is a value stored in the map, so a single map type can
/// switch between hashing schemes at runtime.
pub trait HashStrategy<K: ?Sized> {
    /// Hashes a key.
    fn hash_key(&self, key: &K) -> u64;

    /// Returns true if two keys are the same entry.
    fn same_key(&self, a: &K, b: &K) -> bool;
}

/// Hashes keys by value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByValue;

impl<K: Hash + Eq + ?Sized> HashStrategy<K> for ByValue {
    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn same_key(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// Keys with a stable allocation identity.
pub trait Identity {
    /// Returns an address that is unique among live values.
    fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn identity(&self) -> usize {
        Arc::as_ptr(self).cast::<()>() as usize
    }
}

impl<T: ?Sized> Identity for Rc<T> {
    fn identity(&self) -> usize {
        Rc::as_ptr(self).cast::<()>() as usize
    }
}

/// Hashes keys by allocation identity.
///
/// Two keys are equal only if they share the same allocation, regardless of
/// their contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByIdentity;

impl ByIdentity {
    /// Spreads an address across the full word. Allocation addresses have
    /// zero low bits, which would otherwise cluster under the table mask.
    #[must_use]
    pub const fn mix(address: usize) -> u64 {
        let h = (address as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        h ^ (h >> 29)
    }
}

impl<K: Identity> HashStrategy<K> for ByIdentity {
    fn hash_key(&self, key: &K) -> u64 {
        Self::mix(key.identity())
    }

    fn same_key(&self, a: &K, b: &K) -> bool {
        a.identity() == b.identity()
    }
}

// =============================================================================
// Slots
// =============================================================================

/// A used table slot. `value == None` marks a tombstone whose key is kept
/// so an equal insert can revive the slot in place.
#[derive(Clone)]
struct Slot<K, V> {
    key: K,
    value: Option<V>,
}

enum Probe {
    Found(usize),
    Revivable(usize),
    Vacant(usize),
}

/// Occupancy counters of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    /// Table size (always a power of two).
    pub capacity: usize,
    /// Live entries.
    pub live: usize,
    /// Tombstoned slots.
    pub deleted: usize,
    /// Length of the insertion-order list (`live + deleted`).
    pub inserted: usize,
}

// =============================================================================
// IndexedMap
// =============================================================================

/// Insertion-ordered open-addressing hash map.
///
/// # Example
///
/// ```
/// use tessera_foundation::IndexedMap;
///
/// let mut map: IndexedMap<_, _> = IndexedMap::new();
/// map.insert("b", 2);
/// map.insert("a", 1);
/// assert_eq!(map.get(&"a"), Some(&1));
/// let keys: Vec<_> = map.keys().copied().collect();
/// assert_eq!(keys, vec!["b", "a"]);
/// ```
#[derive(Clone)]
pub struct IndexedMap<K, V, S = ByValue> {
    slots: Vec<Option<Slot<K, V>>>,
    /// Slot positions in first-insertion order, live and deleted.
    order: Vec<usize>,
    live: usize,
    deleted: usize,
    min_capacity: usize,
    strategy: S,
}

impl<K, V, S: Default> IndexedMap<K, V, S> {
    /// Creates an empty map with the default capacity floor.
    #[must_use]
    pub fn new() -> Self {
        Self::with_min_capacity(DEFAULT_MIN_CAPACITY)
    }

    /// Creates an empty map whose table never shrinks below `min_capacity`.
    #[must_use]
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self::with_strategy(S::default(), min_capacity)
    }
}

impl<K, V, S: Default> Default for IndexedMap<K, V, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> IndexedMap<K, V, S> {
    /// Creates an empty map with an explicit strategy value.
    #[must_use]
    pub fn with_strategy(strategy: S, min_capacity: usize) -> Self {
        let min_capacity = min_capacity.max(MINIMUM_CAPACITY).next_power_of_two();
        Self {
            slots: empty_slots(min_capacity),
            order: Vec::new(),
            live: 0,
            deleted: 0,
            min_capacity,
            strategy,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Current table size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the strategy value.
    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Returns occupancy counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            capacity: self.slots.len(),
            live: self.live,
            deleted: self.deleted,
            inserted: self.order.len(),
        }
    }

    /// Iterates live entries in insertion order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: &self.slots,
            order: self.order.iter(),
            remaining: self.live,
        }
    }

    /// Iterates live keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates live values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// Calls `f` on every live entry with mutable access to the value.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&K, &mut V)) {
        for &pos in &self.order {
            if let Some(Slot {
                key,
                value: Some(value),
            }) = &mut self.slots[pos]
            {
                f(key, value);
            }
        }
    }

    /// Removes every entry and resets the table to its floor.
    pub fn clear(&mut self) {
        self.slots = empty_slots(self.min_capacity);
        self.order.clear();
        self.live = 0;
        self.deleted = 0;
    }

    /// Removes every entry and returns them in insertion order.
    pub fn drain(&mut self) -> std::vec::IntoIter<(K, V)> {
        let mut slots = std::mem::replace(&mut self.slots, empty_slots(self.min_capacity));
        let order = std::mem::take(&mut self.order);
        let mut out = Vec::with_capacity(self.live);
        for pos in order {
            if let Some(Slot {
                key,
                value: Some(value),
            }) = slots[pos].take()
            {
                out.push((key, value));
            }
        }
        self.live = 0;
        self.deleted = 0;
        out.into_iter()
    }

    /// Opens a restartable cursor over the live entries.
    pub fn cursor(&mut self) -> Cursor<'_, K, V, S> {
        Cursor {
            map: self,
            next: 0,
            current: None,
        }
    }

    fn assert_structure(&self) {
        debug_assert_eq!(
            self.order.len(),
            self.live + self.deleted,
            "insertion order out of sync with slot counters"
        );
        debug_assert!(self.live + self.deleted < self.slots.len());
    }

    /// Marks the occupied slot at `pos` as deleted and returns its value.
    fn tombstone(&mut self, pos: usize) -> Option<V> {
        let value = self.slots[pos].as_mut()?.value.take()?;
        self.live -= 1;
        self.deleted += 1;
        Some(value)
    }

    fn live_at(&self, pos: usize) -> Option<(&K, &V)> {
        let slot = self.slots[pos].as_ref()?;
        Some((&slot.key, slot.value.as_ref()?))
    }
}

impl<K, V, S: HashStrategy<K>> IndexedMap<K, V, S> {
    fn probe(&self, key: &K) -> Probe {
        let mask = self.slots.len() - 1;
        #[allow(clippy::cast_possible_truncation)]
        let mut pos = (self.strategy.hash_key(key) as usize) & mask;
        loop {
            match &self.slots[pos] {
                None => return Probe::Vacant(pos),
                Some(slot) if self.strategy.same_key(&slot.key, key) => {
                    return if slot.value.is_some() {
                        Probe::Found(pos)
                    } else {
                        Probe::Revivable(pos)
                    };
                }
                Some(_) => pos = (pos + 1) & mask,
            }
        }
    }

    fn find_live(&self, key: &K) -> Option<usize> {
        match self.probe(key) {
            Probe::Found(pos) => Some(pos),
            Probe::Revivable(_) | Probe::Vacant(_) => None,
        }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let pos = self.find_live(key)?;
        self.live_at(pos).map(|(_, v)| v)
    }

    /// Returns the stored key and value equal to `key`.
    #[must_use]
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let pos = self.find_live(key)?;
        self.live_at(pos)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let pos = self.find_live(key)?;
        self.slots[pos].as_mut()?.value.as_mut()
    }

    /// Returns true if `key` is live.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_live(key).is_some()
    }

    /// Inserts or replaces a value, returning the previous live value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.resize();
        let previous = match self.probe(&key) {
            Probe::Found(pos) => self.slots[pos]
                .as_mut()
                .and_then(|slot| slot.value.replace(value)),
            Probe::Revivable(pos) => {
                self.slots[pos] = Some(Slot {
                    key,
                    value: Some(value),
                });
                self.deleted -= 1;
                self.live += 1;
                None
            }
            Probe::Vacant(pos) => {
                self.slots[pos] = Some(Slot {
                    key,
                    value: Some(value),
                });
                self.order.push(pos);
                self.live += 1;
                None
            }
        };
        self.assert_structure();
        previous
    }

    /// Returns the value under `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.resize();
        let pos = match self.probe(&key) {
            Probe::Found(pos) => pos,
            Probe::Revivable(pos) => {
                self.deleted -= 1;
                self.live += 1;
                pos
            }
            Probe::Vacant(pos) => {
                self.order.push(pos);
                self.live += 1;
                pos
            }
        };
        self.assert_structure();
        let slot = self.slots[pos].get_or_insert_with(|| Slot { key, value: None });
        slot.value.get_or_insert_with(make)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.resize();
        let pos = self.find_live(key)?;
        let value = self.tombstone(pos);
        self.assert_structure();
        value
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        let mut doomed = Vec::new();
        for &pos in &self.order {
            if let Some(Slot {
                key,
                value: Some(value),
            }) = &mut self.slots[pos]
            {
                if !keep(key, value) {
                    doomed.push(pos);
                }
            }
        }
        for pos in doomed {
            self.tombstone(pos);
        }
        self.resize();
        self.assert_structure();
    }

    /// Makes room for `additional` more entries without intermediate growth.
    pub fn reserve(&mut self, additional: usize) {
        let target = table_size_for(self.live + additional, self.min_capacity);
        if target > self.slots.len() {
            self.rebuild(target);
        }
    }

    /// Applies the resize policy.
    ///
    /// Called before every insert and remove. Iterator removal never calls
    /// it, so positions seen by a live cursor stay valid.
    pub fn resize(&mut self) {
        let capacity = self.slots.len();
        let upper = capacity / 4 * 3;
        let lower = capacity / 16 * 3;

        if self.live > upper {
            self.rebuild(capacity * 2);
            return;
        }
        if self.live < lower && capacity > self.min_capacity {
            let target = table_size_for(self.live * 2, self.min_capacity);
            if target < capacity {
                self.rebuild(target);
                return;
            }
        }
        let purge = (self.deleted > self.live && self.live > 2)
            || self.live + self.deleted > upper;
        if purge && self.deleted > 0 {
            self.rebuild(capacity);
        }
    }

    fn rebuild(&mut self, capacity: usize) {
        let mut old = std::mem::replace(&mut self.slots, empty_slots(capacity));
        let order = std::mem::replace(&mut self.order, Vec::with_capacity(self.live));
        let mask = capacity - 1;
        for pos in order {
            let Some(slot) = old[pos].take() else {
                continue;
            };
            if slot.value.is_none() {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let mut target = (self.strategy.hash_key(&slot.key) as usize) & mask;
            while self.slots[target].is_some() {
                target = (target + 1) & mask;
            }
            self.slots[target] = Some(slot);
            self.order.push(target);
        }
        self.deleted = 0;
        self.assert_structure();
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for IndexedMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S: HashStrategy<K> + Default> FromIterator<(K, V)> for IndexedMap<K, V, S> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V, S: HashStrategy<K>> Extend<(K, V)> for IndexedMap<K, V, S> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

fn empty_slots<K, V>(capacity: usize) -> Vec<Option<Slot<K, V>>> {
    (0..capacity).map(|_| None).collect()
}

/// Smallest power-of-two table holding `live` entries under the 3/4 load
/// factor, but never below `floor`.
fn table_size_for(live: usize, floor: usize) -> usize {
    let needed = (live * 4).div_ceil(3) + 1;
    needed.next_power_of_two().max(floor)
}

/// Insertion-order iterator over an [`IndexedMap`].
pub struct Iter<'a, K, V> {
    slots: &'a [Option<Slot<K, V>>],
    order: std::slice::Iter<'a, usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for &pos in self.order.by_ref() {
            if let Some(Slot {
                key,
                value: Some(value),
            }) = &self.slots[pos]
            {
                self.remaining -= 1;
                return Some((key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a IndexedMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Restartable cursor that can remove the entry it last returned.
///
/// Removal through the cursor tombstones the slot without resizing, so the
/// walk continues undisturbed.
pub struct Cursor<'a, K, V, S> {
    map: &'a mut IndexedMap<K, V, S>,
    next: usize,
    current: Option<usize>,
}

impl<K, V, S> Cursor<'_, K, V, S> {
    /// Rewinds to the first entry and returns the live count.
    pub fn reset(&mut self) -> usize {
        self.next = 0;
        self.current = None;
        self.map.live
    }

    /// Advances to the next live entry.
    pub fn next_entry(&mut self) -> Option<(&K, &mut V)> {
        while self.next < self.map.order.len() {
            let pos = self.map.order[self.next];
            self.next += 1;
            let live = self.map.slots[pos]
                .as_ref()
                .is_some_and(|slot| slot.value.is_some());
            if live {
                self.current = Some(pos);
                let slot = self.map.slots[pos].as_mut()?;
                return Some((&slot.key, slot.value.as_mut()?));
            }
        }
        self.current = None;
        None
    }

    /// Removes the entry last returned by [`Cursor::next_entry`].
    pub fn remove_current(&mut self) -> Option<V> {
        let pos = self.current.take()?;
        self.map.tombstone(pos)
    }
}

// =============================================================================
// IndexedSet
// =============================================================================

/// Insertion-ordered open-addressing hash set.
#[derive(Clone)]
pub struct IndexedSet<K, S = ByValue> {
    map: IndexedMap<K, (), S>,
}

impl<K, S: Default> IndexedSet<K, S> {
    /// Creates an empty set with the default capacity floor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: IndexedMap::new(),
        }
    }

    /// Creates an empty set whose table never shrinks below `min_capacity`.
    #[must_use]
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self {
            map: IndexedMap::with_min_capacity(min_capacity),
        }
    }
}

impl<K, S: Default> Default for IndexedSet<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> IndexedSet<K, S> {
    /// Creates an empty set with an explicit strategy value.
    #[must_use]
    pub fn with_strategy(strategy: S, min_capacity: usize) -> Self {
        Self {
            map: IndexedMap::with_strategy(strategy, min_capacity),
        }
    }

    /// Number of live members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns occupancy counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.map.stats()
    }

    /// Iterates members in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &K> {
        self.map.iter().map(|(k, ())| k)
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Removes every member and returns them in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = K> {
        self.map.drain().map(|(k, ())| k)
    }
}

impl<K, S: HashStrategy<K>> IndexedSet<K, S> {
    /// Adds a member. Returns true if it was not already present.
    pub fn insert(&mut self, key: K) -> bool {
        self.map.insert(key, ()).is_none()
    }

    /// Removes a member. Returns true if it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.map.remove(key).is_some()
    }

    /// Returns true if `key` is a member.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the stored member equal to `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&K> {
        self.map.get_key_value(key).map(|(k, ())| k)
    }

    /// Keeps only the members for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.map.retain(|k, ()| keep(k));
    }
}

impl<K: fmt::Debug, S> fmt::Debug for IndexedSet<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K, S: HashStrategy<K> + Default> FromIterator<K> for IndexedSet<K, S> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<K, S: HashStrategy<K>> Extend<K> for IndexedSet<K, S> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        self.map.extend(iter.into_iter().map(|k| (k, ())));
    }
}
