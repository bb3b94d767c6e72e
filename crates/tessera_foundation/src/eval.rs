//! Evaluation capabilities supplied by the embedding application.
//!
//! The engine never inspects user objects directly. It reads fields through
//! a [`FieldExtractor`] and tests conditions through a [`Predicate`]. Both
//! are implemented for plain closures.

use std::any::Any;

use crate::value::Value;

/// A condition over an ordered list of field values.
pub trait Predicate: Send + Sync {
    /// Returns true if the values satisfy the condition.
    fn test(&self, values: &[Value]) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&[Value]) -> bool + Send + Sync,
{
    fn test(&self, values: &[Value]) -> bool {
        self(values)
    }
}

/// Reads one field value out of a fact object.
pub trait FieldExtractor: Send + Sync {
    /// Extracts the value. Returns `Nil` if the object is not of the
    /// expected type.
    fn extract(&self, fact: &(dyn Any + Send + Sync)) -> Value;
}

impl<F> FieldExtractor for F
where
    F: Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync,
{
    fn extract(&self, fact: &(dyn Any + Send + Sync)) -> Value {
        self(fact)
    }
}
