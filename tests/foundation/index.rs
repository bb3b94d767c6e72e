//! Integration tests for the indexed set/map
//!
//! Tests insertion order, lazy deletion, resizing, cursors, and identity
//! hashing.

use std::sync::Arc;

use tessera_foundation::{ByIdentity, IndexedMap, IndexedSet, MINIMUM_CAPACITY};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn insert_get_remove() {
    let mut map: IndexedMap<_, _> = IndexedMap::new();
    assert!(map.is_empty());
    assert_eq!(map.insert("a", 1), None);
    assert_eq!(map.insert("a", 2), Some(1));
    assert_eq!(map.get(&"a"), Some(&2));
    assert_eq!(map.remove(&"a"), Some(2));
    assert_eq!(map.remove(&"a"), None);
    assert!(!map.contains_key(&"a"));
}

#[test]
fn iteration_follows_first_insertion() {
    let mut map: IndexedMap<_, _> = IndexedMap::new();
    for key in ["c", "a", "b"] {
        map.insert(key, ());
    }
    map.remove(&"a");
    map.insert("d", ());
    map.insert("a", ());

    // A revived key keeps its original position.
    let keys: Vec<_> = map.keys().copied().collect();
    assert_eq!(keys, vec!["c", "a", "b", "d"]);
}

#[test]
fn get_or_insert_with_creates_once() {
    let mut map: IndexedMap<u32, Vec<u32>> = IndexedMap::new();
    map.get_or_insert_with(1, Vec::new).push(10);
    map.get_or_insert_with(1, || vec![99]).push(11);
    assert_eq!(map.get(&1), Some(&vec![10, 11]));
}

// =============================================================================
// Resizing
// =============================================================================

#[test]
fn grows_and_shrinks_to_the_floor() {
    let mut map: IndexedMap<_, _> = IndexedMap::with_min_capacity(16);
    for i in 0..1_000u32 {
        map.insert(i, i);
    }
    assert_eq!(map.len(), 1_000);
    assert!(map.capacity() >= 1_024);

    for i in 0..1_000u32 {
        assert_eq!(map.remove(&i), Some(i));
    }
    map.insert(0, 0);
    assert_eq!(map.capacity(), 16);
    let stats = map.stats();
    assert_eq!(stats.live, 1);
}

#[test]
fn floor_is_never_below_minimum() {
    let map: IndexedMap<u32, ()> = IndexedMap::with_min_capacity(1);
    assert_eq!(map.capacity(), MINIMUM_CAPACITY);
}

#[test]
fn table_always_keeps_a_free_slot() {
    let mut map: IndexedMap<_, _> = IndexedMap::with_min_capacity(8);
    for round in 0..50u32 {
        for i in 0..6 {
            map.insert(round * 10 + i, i);
        }
        for i in 0..6 {
            map.remove(&(round * 10 + i));
        }
        let stats = map.stats();
        assert!(stats.live + stats.deleted < stats.capacity);
    }
    assert!(map.is_empty());
}

// =============================================================================
// Cursor
// =============================================================================

#[test]
fn cursor_removes_during_walk() {
    let mut map: IndexedMap<u32, u32> = (0..20).map(|i| (i, i)).collect();
    let mut cursor = map.cursor();
    assert_eq!(cursor.reset(), 20);
    while let Some((key, value)) = cursor.next_entry() {
        *value += 100;
        if key % 2 == 0 {
            cursor.remove_current();
        }
    }

    assert_eq!(map.len(), 10);
    assert_eq!(map.get(&3), Some(&103));
    assert_eq!(map.get(&4), None);
}

#[test]
fn retain_keeps_matching() {
    let mut map: IndexedMap<u32, u32> = (0..10).map(|i| (i, i * i)).collect();
    map.retain(|_, v| *v > 10);
    let keys: Vec<_> = map.keys().copied().collect();
    assert_eq!(keys, vec![4, 5, 6, 7, 8, 9]);
}

// =============================================================================
// Sets and Strategies
// =============================================================================

#[test]
fn set_basic_operations() {
    let mut set: IndexedSet<_> = IndexedSet::new();
    assert!(set.insert(3));
    assert!(!set.insert(3));
    assert!(set.contains(&3));
    assert!(set.remove(&3));
    assert!(set.is_empty());
}

#[test]
fn identity_set_ignores_contents() {
    let a: Arc<str> = Arc::from("same");
    let b: Arc<str> = Arc::from("same");
    let mut set: IndexedSet<Arc<str>, ByIdentity> = IndexedSet::new();

    assert!(set.insert(Arc::clone(&a)));
    assert!(set.insert(Arc::clone(&b)));
    assert!(!set.insert(Arc::clone(&a)));
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
}

#[test]
fn drain_empties_in_order() {
    let mut set: IndexedSet<u32> = [5, 1, 3].into_iter().collect();
    let drained: Vec<_> = set.drain().collect();
    assert_eq!(drained, vec![5, 1, 3]);
    assert!(set.is_empty());
}
