//! Integration tests for the type registry
//!
//! Tests declarations, fields, extraction checks, and snapshots.

use std::any::TypeId;

use tessera_foundation::{ErrorKind, Type, Value};
use tessera_storage::TypeRegistry;

struct Order {
    total: i64,
    note: Option<String>,
}

struct Refund;

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let order = registry.declare::<Order>("Order").unwrap();
    registry
        .register_field(order, "total", Type::Int, |o: &Order| Value::Int(o.total))
        .unwrap();
    registry
        .register_field(order, "note", Type::option(Type::String), |o: &Order| {
            o.note.clone().into()
        })
        .unwrap();
    registry
}

// =============================================================================
// Declarations
// =============================================================================

#[test]
fn declare_is_idempotent_per_rust_type() {
    let mut registry = registry();
    let first = registry.resolve("Order").unwrap();
    assert_eq!(registry.declare::<Order>("Order").unwrap(), first);
    assert_eq!(registry.len(), 1);
}

#[test]
fn declare_conflicting_rust_type_fails() {
    let mut registry = registry();
    let err = registry.declare::<Refund>("Order").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeConflict { .. }));
}

#[test]
fn first_declaration_is_the_rust_default() {
    let mut registry = registry();
    let alias = registry.declare::<Order>("BigOrder").unwrap();
    let default = registry.resolve_rust(TypeId::of::<Order>()).unwrap();
    assert_ne!(default, alias);
    assert_eq!(registry.get(default).map(|s| s.name()), Some("Order"));
}

#[test]
fn require_unknown_type() {
    let registry = registry();
    let err = registry.require("Invoice").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownType(_)));
}

// =============================================================================
// Fields
// =============================================================================

#[test]
fn fields_resolve_by_name() {
    let registry = registry();
    let total = registry.field("Order", "total").unwrap();
    let note = registry.field("Order", "note").unwrap();
    assert_eq!(total.slot(), 0);
    assert_eq!(note.slot(), 1);

    let err = registry.field("Order", "weight").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));
}

#[test]
fn field_for_wrong_rust_type_fails() {
    let mut registry = registry();
    let order = registry.resolve("Order").unwrap();
    let err = registry
        .register_field(order, "x", Type::Int, |_: &Refund| Value::Int(0))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeConflict { .. }));
}

#[test]
fn extraction_checks_declared_type() {
    let mut registry = registry();
    let order = registry.resolve("Order").unwrap();
    registry
        .register_field(order, "bogus", Type::Int, |_: &Order| Value::from("text"))
        .unwrap();

    let schema = registry.require("Order").unwrap();
    let fact = Order {
        total: 12,
        note: None,
    };
    assert_eq!(
        schema.extract_all(&fact),
        vec![Value::Int(12), Value::Nil, Value::Nil]
    );
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn clones_are_independent_snapshots() {
    let mut registry = registry();
    let snapshot = registry.clone();
    registry.declare::<Refund>("Refund").unwrap();

    assert!(snapshot.resolve("Refund").is_none());
    assert!(registry.resolve("Refund").is_some());
    assert_eq!(snapshot.iter().count(), 1);
}
