//! Integration tests for fact records and handles
//!
//! Tests handle allocation, validation, records, and lazy field refresh.

use std::sync::Arc;

use tessera_foundation::{ErrorKind, FactHandle, Type, Value};
use tessera_storage::{FactRecord, FactStore, HandleAllocator, TypeRegistry};

struct Sensor {
    id: i64,
    level: i64,
}

// =============================================================================
// Handles
// =============================================================================

#[test]
fn handles_are_unique_and_validated() {
    let allocator = HandleAllocator::new(4);
    let a = allocator.allocate();
    let b = allocator.allocate();
    assert_ne!(a, b);
    assert_eq!(allocator.allocated(), 2);

    assert!(allocator.validate(a).is_ok());
    let foreign = allocator.validate(FactHandle::new(5, 0)).unwrap_err();
    assert!(matches!(foreign.kind, ErrorKind::ForeignHandle(_)));
    let unknown = allocator.validate(FactHandle::new(4, 99)).unwrap_err();
    assert!(matches!(unknown.kind, ErrorKind::UnknownHandle(_)));
}

// =============================================================================
// Records
// =============================================================================

#[test]
fn records_extract_and_downcast() {
    let mut registry = TypeRegistry::new();
    let key = registry.declare::<Sensor>("Sensor").unwrap();
    registry
        .register_field(key, "id", Type::Int, |s: &Sensor| Value::Int(s.id))
        .unwrap();

    let schema = registry.get(key).unwrap();
    let handle = FactHandle::new(1, 0);
    let record = FactRecord::new(handle, schema, Arc::new(Sensor { id: 3, level: 9 }));

    assert_eq!(record.values(), &[Value::Int(3)]);
    assert_eq!(record.value(5), &Value::Nil);
    assert_eq!(record.downcast::<Sensor>().map(|s| s.level), Some(9));
    assert!(record.downcast::<String>().is_none());
}

#[test]
fn refresh_type_extracts_late_fields() {
    let mut registry = TypeRegistry::new();
    let key = registry.declare::<Sensor>("Sensor").unwrap();

    let mut store = FactStore::with_min_capacity(16);
    for i in 0..3 {
        let schema = registry.get(key).unwrap();
        let handle = FactHandle::new(1, i);
        store.insert(FactRecord::new(
            handle,
            schema,
            Arc::new(Sensor {
                id: i64::try_from(i).unwrap(),
                level: 0,
            }),
        ));
    }
    assert!(store.iter().all(|r| r.values().is_empty()));

    registry
        .register_field(key, "id", Type::Int, |s: &Sensor| Value::Int(s.id))
        .unwrap();
    store.refresh_type(registry.get(key).unwrap());

    let ids: Vec<_> = store.iter().map(|r| r.value(0).clone()).collect();
    assert_eq!(ids, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
}

#[test]
fn store_insert_remove() {
    let mut registry = TypeRegistry::new();
    let key = registry.declare::<Sensor>("Sensor").unwrap();
    let schema = registry.get(key).unwrap();
    let handle = FactHandle::new(1, 0);

    let mut store = FactStore::new();
    assert!(store
        .insert(FactRecord::new(handle, schema, Arc::new(Sensor { id: 1, level: 1 })))
        .is_none());
    assert!(store.contains(handle));
    assert_eq!(store.len(), 1);
    assert!(store.remove(handle).is_some());
    assert!(store.is_empty());
}
