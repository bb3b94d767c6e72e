//! Configuration for knowledge bases and sessions.

use tessera_foundation::DEFAULT_MIN_CAPACITY;

/// What to do with a fact whose Rust type was never declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    /// Declare the type on the fly, without fields, and log a warning.
    /// No rule references it yet, so the fact matches nothing.
    #[default]
    Warn,
    /// Reject the insert with an `UnknownType` error.
    Fail,
}

/// When facts are re-indexed after a field is registered on their type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldIndexing {
    /// Extract the new field from every existing fact immediately.
    #[default]
    Eager,
    /// Extract it the next time the fact is evaluated.
    Lazy,
}

/// Engine configuration.
///
/// Captured by a knowledge base and copied into every session it creates.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// Handling of undeclared fact types.
    pub unknown_types: UnknownTypePolicy,

    /// Re-indexing strategy for late field registration.
    pub field_indexing: FieldIndexing,

    /// Floor for the table size of every indexed set and map.
    pub min_index_capacity: usize,

    /// Maximum number of fire cycles one `fire()` call may run before
    /// giving up on reactions that keep feeding each other.
    pub max_fire_cycles: u32,

    /// Whether condition evaluations are published to listeners.
    pub evaluation_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            unknown_types: UnknownTypePolicy::Warn,
            field_indexing: FieldIndexing::Eager,
            min_index_capacity: DEFAULT_MIN_CAPACITY,
            max_fire_cycles: 10_000,
            evaluation_events: false,
        }
    }
}

impl Configuration {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration that rejects undeclared types.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            unknown_types: UnknownTypePolicy::Fail,
            ..Self::default()
        }
    }

    /// Builder method to set the unknown type policy.
    #[must_use]
    pub fn with_unknown_types(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_types = policy;
        self
    }

    /// Builder method to set the field indexing strategy.
    #[must_use]
    pub fn with_field_indexing(mut self, indexing: FieldIndexing) -> Self {
        self.field_indexing = indexing;
        self
    }

    /// Builder method to set the minimum index capacity.
    #[must_use]
    pub fn with_min_index_capacity(mut self, capacity: usize) -> Self {
        self.min_index_capacity = capacity;
        self
    }

    /// Builder method to set the fire cycle limit.
    #[must_use]
    pub fn with_max_fire_cycles(mut self, limit: u32) -> Self {
        self.max_fire_cycles = limit;
        self
    }

    /// Builder method to enable/disable condition evaluation events.
    #[must_use]
    pub fn with_evaluation_events(mut self, enabled: bool) -> Self {
        self.evaluation_events = enabled;
        self
    }
}
