//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use tessera_foundation::{Error, ErrorContext, ErrorKind, FactHandle, SemanticLimit, Type};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_type_mismatch() {
    let err = Error::type_mismatch(Type::Int, Type::String);
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    assert_eq!(err.to_string(), "type mismatch: expected int, got string");
}

#[test]
fn error_unknown_type() {
    let err = Error::unknown_type("Order");
    assert!(matches!(err.kind, ErrorKind::UnknownType(ref name) if name == "Order"));
    assert!(err.to_string().contains("Order"));
}

#[test]
fn error_unknown_field() {
    let err = Error::unknown_field("Order", "total");
    let msg = err.to_string();
    assert!(msg.contains("total"));
    assert!(msg.contains("Order"));
}

#[test]
fn handle_errors() {
    let handle = FactHandle::new(3, 7);
    assert!(Error::unknown_handle(handle).is_handle_error());
    assert!(Error::foreign_handle(handle).is_handle_error());
    assert!(!Error::duplicate_rule("r").is_handle_error());
}

#[test]
fn error_invalid_rule() {
    let err = Error::invalid_rule("late", "unknown variable $x");
    assert_eq!(err.to_string(), "invalid rule late: unknown variable $x");
}

#[test]
fn error_reaction_message_is_kept() {
    let err = Error::reaction("out of stock");
    assert!(matches!(err.kind, ErrorKind::Reaction(ref m) if m == "out of stock"));
}

// =============================================================================
// Semantic Limits
// =============================================================================

#[test]
fn fire_cycle_limit_display() {
    let err = Error::limit_exceeded(SemanticLimit::MaxFireCycles {
        limit: 10,
        context: Some("still firing: ping".into()),
    });
    assert_eq!(
        err.to_string(),
        "limit exceeded: max fire cycles (10) exceeded: still firing: ping"
    );
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn error_with_context() {
    let context = ErrorContext::new()
        .with_rule("restock")
        .with_handle(FactHandle::new(1, 4))
        .with_frame("fire cycle 2");
    let err = Error::reaction("boom").with_context(context);

    let context = err.context.as_ref().unwrap();
    assert_eq!(context.rule.as_deref(), Some("restock"));
    assert_eq!(context.stack.len(), 1);
    let shown = context.to_string();
    assert!(shown.contains("in rule restock"));
    assert!(shown.contains("Fact(4)"));
    assert!(shown.contains("fire cycle 2"));
}
