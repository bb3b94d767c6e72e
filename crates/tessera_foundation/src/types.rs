//! Type descriptors for declared fact fields.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Type descriptor for a declared field.
///
/// Used to check values produced by field extractors at runtime.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The nil type (only value: nil).
    Nil,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// String type.
    String,
    /// Reference to another fact.
    Fact,
    /// Optional type (value or nil).
    Option(Box<Type>),
    /// Any type (accepts any value).
    Any,
}

impl Type {
    /// Creates an optional type.
    #[must_use]
    pub fn option(inner: Type) -> Self {
        Self::Option(Box::new(inner))
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if this type can be nil.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Nil | Self::Option(_) | Self::Any)
    }

    /// Checks if a value type is accepted by this type.
    ///
    /// - `Any` accepts all types
    /// - `Option(T)` accepts `Nil` and any type that `T` accepts
    /// - `Float` accepts `Int` (numeric promotion)
    /// - Other types must match exactly
    #[must_use]
    pub fn accepts(&self, value_type: &Type) -> bool {
        if matches!(self, Self::Any) {
            return true;
        }

        if let Self::Option(inner) = self {
            return matches!(value_type, Self::Nil) || inner.accepts(value_type);
        }

        matches!(
            (self, value_type),
            (Self::Nil, Self::Nil)
                | (Self::Bool, Self::Bool)
                | (Self::Int | Self::Float, Self::Int)
                | (Self::Float, Self::Float)
                | (Self::String, Self::String)
                | (Self::Fact, Self::Fact)
        )
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Fact => write!(f, "fact"),
            Self::Option(inner) => write!(f, "option<{inner:?}>"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
