//! Rules, beta network, aggregates, and sessions for Tessera.
//!
//! This crate provides:
//! - [`RuleBuilder`] - Rule definitions with alpha/beta conditions and exists / not-exists clauses
//! - [`Session`] - Working memory, the fire loop, and hot deployment
//! - [`Knowledge`] - Shared declarations forked into sessions
//! - [`ActionSink`] - Thread-safe buffering of inserts, updates, and deletes
//! - [`EventBus`] - Structured engine events for listeners

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod activation;
pub mod aggregate;
pub mod beta;
pub mod config;
pub mod events;
pub mod knowledge;
pub mod rule;
pub mod session;

pub use action::ActionSink;
pub use activation::{Activation, ReactionContext};
pub use aggregate::AggregateKind;
pub use beta::{NetworkStats, StoreMode};
pub use config::{Configuration, FieldIndexing, UnknownTypePolicy};
pub use events::{ConditionEvaluation, EngineEvent, EventBus, EventListener};
pub use knowledge::{ExceptionHandler, Knowledge};
pub use rule::{
    AggregateBuilder, Reaction, RetractionHandler, RuleBuilder, RuleCompiler, RuleDefinition,
    RuleId,
};
pub use session::{FireReport, MemoryStats, RuleStats, Session, SessionState};
