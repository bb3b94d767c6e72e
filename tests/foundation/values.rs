//! Integration tests for Value types
//!
//! Tests equality, hashing, ordering, display, and key tuples.

use std::collections::HashSet;
use std::sync::Arc;

use tessera_foundation::{FactHandle, KeyTuple, Type, Value};

// =============================================================================
// Equality and Hashing
// =============================================================================

#[test]
fn floats_compare_by_bits() {
    assert_eq!(Value::Float(0.5), Value::Float(0.5));
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    assert_ne!(Value::Float(0.0), Value::Float(-0.0));
}

#[test]
fn int_and_float_are_distinct_keys() {
    assert_ne!(Value::Int(1), Value::Float(1.0));

    let set: HashSet<Value> = [Value::Int(1), Value::Float(1.0), Value::Int(1)]
        .into_iter()
        .collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn strings_compare_by_content() {
    let a = Value::String(Arc::from("north"));
    let b: Value = "north".into();
    assert_eq!(a, b);
}

#[test]
fn numeric_ordering_promotes() {
    assert!(Value::Int(2) < Value::Float(2.5));
    assert!(Value::Float(1.5) < Value::Int(2));
    assert_eq!(Value::Int(1).partial_cmp(&Value::String("a".into())), None);
}

// =============================================================================
// Conversions and Accessors
// =============================================================================

#[test]
fn value_conversions() {
    assert_eq!(Value::from(3i32), Value::Int(3));
    assert_eq!(Value::from(true), Value::Bool(true));
    assert_eq!(Value::from(None::<i64>), Value::Nil);
    assert_eq!(Value::from(Some(4i64)), Value::Int(4));

    let handle = FactHandle::new(1, 9);
    assert_eq!(Value::from(handle).as_fact(), Some(handle));
}

#[test]
fn value_types() {
    assert_eq!(Value::Int(1).value_type(), Type::Int);
    assert_eq!(Value::Nil.value_type(), Type::Nil);
    assert!(Type::Float.accepts(&Value::Int(1).value_type()));
    assert!(!Type::Int.accepts(&Value::Float(1.0).value_type()));
    assert!(Type::option(Type::String).accepts(&Type::Nil));
}

#[test]
fn value_display() {
    assert_eq!(Value::Nil.to_string(), "nil");
    assert_eq!(Value::Int(-3).to_string(), "-3");
    assert_eq!(Value::from("x").to_string(), "x");
    assert_eq!(Value::Fact(FactHandle::new(2, 5)).to_string(), "Fact(5)");
}

// =============================================================================
// Key Tuples
// =============================================================================

#[test]
fn key_tuple_equality_and_hash() {
    let a = KeyTuple::new(vec![Value::Int(1), Value::from("a")]);
    let b: KeyTuple = vec![Value::Int(1), Value::from("a")].into();
    assert_eq!(a, b);
    assert_eq!(a.cached_hash(), b.cached_hash());
    assert_ne!(a, KeyTuple::new(vec![Value::Int(1)]));
}

#[test]
fn key_tuple_concat_and_project() {
    let left = KeyTuple::new(vec![Value::Int(1)]);
    let right = KeyTuple::new(vec![Value::Int(2), Value::Int(3)]);
    let joined = KeyTuple::concat([&left, &right]);

    assert_eq!(joined.len(), 3);
    assert_eq!(joined.get(2), Some(&Value::Int(3)));
    assert_eq!(joined.project(&[2, 0]), KeyTuple::new(vec![Value::Int(3), Value::Int(1)]));
    assert_eq!(joined.to_string(), "(1 2 3)");
    assert!(KeyTuple::empty().is_empty());
}

#[test]
fn handles_are_session_scoped() {
    let a = FactHandle::new(1, 0);
    let b = FactHandle::new(2, 0);
    assert_ne!(a, b);
    assert!(FactHandle::null().is_null());
    assert!(!a.is_null());
}
