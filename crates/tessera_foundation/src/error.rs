//! Error types for the Tessera engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::handle::FactHandle;
use crate::types::Type;

/// Result type used throughout Tessera.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Tessera operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates an unknown type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        })
    }

    /// Creates a type conflict error.
    #[must_use]
    pub fn type_conflict(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeConflict {
            type_name: type_name.into(),
            reason: reason.into(),
        })
    }

    /// Creates an unknown handle error.
    #[must_use]
    pub fn unknown_handle(handle: FactHandle) -> Self {
        Self::new(ErrorKind::UnknownHandle(handle))
    }

    /// Creates a foreign handle error.
    #[must_use]
    pub fn foreign_handle(handle: FactHandle) -> Self {
        Self::new(ErrorKind::ForeignHandle(handle))
    }

    /// Creates a duplicate rule error.
    #[must_use]
    pub fn duplicate_rule(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateRule(name.into()))
    }

    /// Creates an invalid rule error.
    #[must_use]
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        })
    }

    /// Creates a reaction failure error.
    #[must_use]
    pub fn reaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reaction(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true if this error reports misuse of a fact handle.
    #[must_use]
    pub const fn is_handle_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnknownHandle(_) | ErrorKind::ForeignHandle(_)
        )
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Type mismatch during field type checking.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// A fact type was referenced before it was declared.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A field was referenced that the type does not declare.
    #[error("unknown field: {field} on type {type_name}")]
    UnknownField {
        /// The type that was queried.
        type_name: String,
        /// The field name that was not found.
        field: String,
    },

    /// A type declaration contradicts an existing one.
    #[error("type conflict on {type_name}: {reason}")]
    TypeConflict {
        /// The conflicting type name.
        type_name: String,
        /// Description of the conflict.
        reason: String,
    },

    /// The handle was never allocated by this session.
    #[error("unknown fact handle: {0:?}")]
    UnknownHandle(FactHandle),

    /// The handle was allocated by a different session.
    #[error("fact handle belongs to another session: {0:?}")]
    ForeignHandle(FactHandle),

    /// A rule with the same name is already deployed.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// A rule definition could not be compiled.
    #[error("invalid rule {rule}: {reason}")]
    InvalidRule {
        /// The rule name.
        rule: String,
        /// Why the rule was rejected.
        reason: String,
    },

    /// A rule reaction reported a failure.
    #[error("reaction failed: {0}")]
    Reaction(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// A single `fire()` ran more evaluation cycles than allowed.
    MaxFireCycles {
        /// The configured limit.
        limit: u32,
        /// Additional context about which rule(s) kept the loop alive.
        context: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxFireCycles { limit, context } => {
                write!(f, "max fire cycles ({limit}) exceeded")?;
                if let Some(ctx) = context {
                    write!(f, ": {ctx}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule name, if the error arose while compiling or firing a rule.
    pub rule: Option<String>,
    /// Fact handle involved in the failure.
    pub handle: Option<FactHandle>,
    /// Chain of operations that led to the error.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule name.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Sets the fact handle.
    #[must_use]
    pub fn with_handle(mut self, handle: FactHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
        }
        if let Some(handle) = self.handle {
            write!(f, " on {handle}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
