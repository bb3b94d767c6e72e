//! Core values, fact handles, and indexing primitives for Tessera.
//!
//! This crate provides:
//! - [`Value`] - Field values extracted from facts
//! - [`FactHandle`] - Session-scoped fact identifiers
//! - [`Type`] - Field type descriptors
//! - [`KeyTuple`] and [`MemoryScope`] - The vocabulary of the join network
//! - [`IndexedMap`] and [`IndexedSet`] - The open-addressing hash index
//! - [`Predicate`] and [`FieldExtractor`] - User-supplied evaluation capabilities
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod eval;
pub mod handle;
pub mod index;
pub mod key;
pub mod types;
pub mod value;

pub use error::{Error, ErrorContext, ErrorKind, Result, SemanticLimit};
pub use eval::{FieldExtractor, Predicate};
pub use handle::FactHandle;
pub use index::{
    ByIdentity, ByValue, Cursor, HashStrategy, Identity, IndexStats, IndexedMap, IndexedSet,
    DEFAULT_MIN_CAPACITY, MINIMUM_CAPACITY,
};
pub use key::{KeyTuple, MemoryScope};
pub use types::Type;
pub use value::Value;
