//! Type registry, fact storage, and alpha memory for Tessera.
//!
//! This crate provides:
//! - [`TypeRegistry`] - Declared fact types and their field extractors
//! - [`FactStore`] - Live facts with cached field values
//! - [`HandleAllocator`] - Thread-safe fact handle allocation
//! - [`AlphaMemory`] - Per-type buckets of facts that pass single-fact conditions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alpha;
pub mod facts;
pub mod schema;

pub use alpha::{
    AlphaAddress, AlphaBucket, AlphaCheckpoint, AlphaCondition, AlphaConditionId, AlphaMemory,
    BucketStats,
};
pub use facts::{Fact, FactRecord, FactStore, HandleAllocator};
pub use schema::{FieldKey, FieldSchema, TypeKey, TypeRegistry, TypeSchema};
