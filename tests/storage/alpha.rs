//! Integration tests for alpha memory
//!
//! Tests bucket sharing, back-fill, scopes, and commit.

use std::sync::Arc;

use tessera_foundation::{FactHandle, MemoryScope, Predicate, Type, Value};
use tessera_storage::{AlphaCondition, AlphaMemory, FactRecord, FactStore, TypeKey, TypeRegistry};

struct Item {
    weight: i64,
}

fn registry() -> (TypeRegistry, TypeKey) {
    let mut registry = TypeRegistry::new();
    let key = registry.declare::<Item>("Item").unwrap();
    registry
        .register_field(key, "weight", Type::Int, |i: &Item| Value::Int(i.weight))
        .unwrap();
    (registry, key)
}

fn heavy() -> Arc<dyn Predicate> {
    Arc::new(|v: &[Value]| v[0].as_int().is_some_and(|w| w > 10))
}

fn ignore(_: &AlphaCondition, _: &[Value], _: bool) {}

fn record(registry: &TypeRegistry, key: TypeKey, index: u64, weight: i64) -> FactRecord {
    let schema = registry.get(key).unwrap();
    FactRecord::new(FactHandle::new(1, index), schema, Arc::new(Item { weight }))
}

// =============================================================================
// Buckets
// =============================================================================

#[test]
fn same_predicate_object_shares_a_bucket() {
    let (registry, key) = registry();
    let schema = registry.get(key).unwrap();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);

    let predicate = heavy();
    let a = alpha.register_condition(key, vec![0], Arc::clone(&predicate), "heavy");
    let b = alpha.register_condition(key, vec![0], Arc::clone(&predicate), "heavy-again");
    assert_eq!(a, b);

    let c = alpha.register_condition(key, vec![0], heavy(), "other-heavy");
    assert_ne!(a, c);

    let (first, created) = alpha.address_for(schema, &[a], &mut facts, &mut ignore);
    assert!(created);
    let (second, created) = alpha.address_for(schema, &[b], &mut facts, &mut ignore);
    assert!(!created);
    assert_eq!(first, second);

    let (third, created) = alpha.address_for(schema, &[c], &mut facts, &mut ignore);
    assert!(created);
    assert_ne!(first, third);
}

#[test]
fn inserts_land_in_delta_until_commit() {
    let (registry, key) = registry();
    let schema = registry.get(key).unwrap();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);
    let id = alpha.register_condition(key, vec![0], heavy(), "heavy");
    let (address, _) = alpha.address_for(schema, &[id], &mut facts, &mut ignore);
    let (all, _) = alpha.address_for(schema, &[], &mut facts, &mut ignore);

    let mut light = record(&registry, key, 0, 5);
    let mut big = record(&registry, key, 1, 50);
    assert_eq!(alpha.insert(&mut light, &mut ignore), vec![all]);
    assert_eq!(alpha.insert(&mut big, &mut ignore), vec![address, all]);
    assert!(alpha.has_delta());

    let bucket = alpha.bucket(address).unwrap();
    assert!(bucket.scope(MemoryScope::Delta).contains(&FactHandle::new(1, 1)));
    assert!(bucket.scope(MemoryScope::Main).is_empty());

    alpha.commit();
    assert!(!alpha.has_delta());
    let bucket = alpha.bucket(address).unwrap();
    assert_eq!(bucket.scope(MemoryScope::Main).len(), 1);
    assert!(alpha.stats().iter().all(|s| s.delta == 0));
}

#[test]
fn new_buckets_back_fill_main() {
    let (registry, key) = registry();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);

    for (index, weight) in [(0, 5), (1, 20), (2, 30)] {
        let mut r = record(&registry, key, index, weight);
        alpha.insert(&mut r, &mut ignore);
        facts.insert(r);
    }
    alpha.commit();

    let id = alpha.register_condition(key, vec![0], heavy(), "heavy");
    let mut evaluated = 0;
    let schema = registry.get(key).unwrap();
    let (address, created) = alpha.address_for(schema, &[id], &mut facts, &mut |_, _, _| {
        evaluated += 1;
    });
    assert!(created);
    assert_eq!(evaluated, 3);

    let bucket = alpha.bucket(address).unwrap();
    assert_eq!(bucket.scope(MemoryScope::Main).len(), 2);
    assert!(bucket.scope(MemoryScope::Delta).is_empty());
}

#[test]
fn rollback_forgets_later_conditions_and_buckets() {
    let (registry, key) = registry();
    let schema = registry.get(key).unwrap();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);
    let light = alpha.register_condition(
        key,
        vec![0],
        Arc::new(|v: &[Value]| v[0] < Value::Int(10)),
        "light",
    );
    let (kept, _) = alpha.address_for(schema, &[light], &mut facts, &mut ignore);
    for (index, weight) in [(0, 5), (1, 20)] {
        let mut r = record(&registry, key, index, weight);
        alpha.insert(&mut r, &mut ignore);
        facts.insert(r);
    }
    alpha.commit();

    let checkpoint = alpha.checkpoint();
    let predicate = heavy();
    let id = alpha.register_condition(key, vec![0], Arc::clone(&predicate), "heavy");
    let (added, created) = alpha.address_for(schema, &[id], &mut facts, &mut ignore);
    assert!(created);
    assert_eq!(alpha.stats().len(), 2);

    alpha.rollback(&checkpoint, &mut facts);
    assert_eq!(alpha.stats().len(), 1);
    assert!(alpha.bucket(added).is_none());
    assert_eq!(alpha.bucket(kept).unwrap().len(), 1);
    let first = facts.get(FactHandle::new(1, 0)).unwrap();
    assert_eq!(first.outcome(0), Some(true));
    assert_eq!(first.outcome(1), None);

    // Registering again starts from a clean slot.
    let mut evaluated = 0;
    let again = alpha.register_condition(key, vec![0], predicate, "heavy");
    let (address, created) = alpha.address_for(schema, &[again], &mut facts, &mut |_, _, _| {
        evaluated += 1;
    });
    assert!(created);
    assert_eq!(address, added);
    assert_eq!(evaluated, 2);
    assert_eq!(alpha.bucket(address).unwrap().len(), 1);
}

#[test]
fn outcomes_are_cached_per_fact() {
    let (registry, key) = registry();
    let schema = registry.get(key).unwrap();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);
    let id = alpha.register_condition(key, vec![0], heavy(), "heavy");
    alpha.address_for(schema, &[id], &mut facts, &mut ignore);

    let other = alpha.register_condition(key, vec![0], heavy(), "also-heavy");
    alpha.address_for(schema, &[id, other], &mut facts, &mut ignore);

    let mut evaluations = 0;
    let mut r = record(&registry, key, 0, 40);
    alpha.insert(&mut r, &mut |_, _, _| evaluations += 1);
    // Two distinct conditions, each evaluated once across both buckets.
    assert_eq!(evaluations, 2);
}

#[test]
fn remove_reports_scope() {
    let (registry, key) = registry();
    let schema = registry.get(key).unwrap();
    let mut facts = FactStore::new();
    let mut alpha = AlphaMemory::new(16);
    let (address, _) = alpha.address_for(schema, &[], &mut facts, &mut ignore);

    let mut a = record(&registry, key, 0, 1);
    alpha.insert(&mut a, &mut ignore);
    alpha.commit();
    let mut b = record(&registry, key, 1, 1);
    alpha.insert(&mut b, &mut ignore);

    assert_eq!(
        alpha.remove(key, FactHandle::new(1, 0)),
        vec![(address, MemoryScope::Main)]
    );
    assert_eq!(
        alpha.remove(key, FactHandle::new(1, 1)),
        vec![(address, MemoryScope::Delta)]
    );
    assert_eq!(alpha.facts_of(key).count(), 0);
}
