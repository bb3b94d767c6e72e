//! Tessera - Embeddable forward-chaining rule engine
//!
//! This crate re-exports all layers of the Tessera system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: tessera_debug       — Evaluation tracing
//! Layer 2: tessera_engine      — Rules, beta network, aggregates, sessions
//! Layer 1: tessera_storage     — Type registry, fact store, alpha memory
//! Layer 0: tessera_foundation  — Core types (Value, FactHandle, Error, indexed set/map)
//! ```

pub use tessera_debug as debug;
pub use tessera_engine as engine;
pub use tessera_foundation as foundation;
pub use tessera_storage as storage;
