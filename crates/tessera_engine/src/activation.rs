//! Activations, the agenda, and the context handed to reactions.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use tessera_foundation::{FactHandle, KeyTuple, Result};
use tessera_storage::{Fact, FactStore};

use crate::action::ActionSink;
use crate::rule::RuleId;

// =============================================================================
// Activation
// =============================================================================

/// A fact combination that satisfied a rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    /// Which rule.
    pub rule: RuleId,
    /// The rule's name.
    pub rule_name: Arc<str>,
    /// The rule's salience.
    pub salience: i32,
    /// Key values of every position, concatenated in declaration order.
    pub key: KeyTuple,
    /// One fact per position, in declaration order.
    pub facts: Vec<FactHandle>,
}

impl Activation {
    /// Returns true if `handle` is part of this combination.
    #[must_use]
    pub fn involves(&self, handle: FactHandle) -> bool {
        self.facts.contains(&handle)
    }
}

// =============================================================================
// Agenda
// =============================================================================

/// Activations waiting for their reactions, highest salience first.
#[derive(Debug, Default)]
pub(crate) struct Agenda {
    queue: VecDeque<Activation>,
}

impl Agenda {
    /// Queues one cycle's activations. `batch` pairs each activation with
    /// its rule's registration order; ties in salience keep that order,
    /// and activations of one rule keep their enumeration order.
    pub(crate) fn schedule(&mut self, mut batch: Vec<(usize, Activation)>) {
        batch.sort_by(|a, b| b.1.salience.cmp(&a.1.salience).then(a.0.cmp(&b.0)));
        self.queue.extend(batch.into_iter().map(|(_, activation)| activation));
    }

    pub(crate) fn pop(&mut self) -> Option<Activation> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}

// =============================================================================
// Reaction Context
// =============================================================================

/// What a reaction sees: the matched facts and a buffer for changes.
///
/// Changes made through the context are applied in the next fire cycle of
/// the same `fire()` call.
pub struct ReactionContext<'a> {
    activation: &'a Activation,
    variables: &'a [Arc<str>],
    facts: &'a FactStore,
    sink: &'a ActionSink,
}

impl<'a> ReactionContext<'a> {
    pub(crate) fn new(
        activation: &'a Activation,
        variables: &'a [Arc<str>],
        facts: &'a FactStore,
        sink: &'a ActionSink,
    ) -> Self {
        Self {
            activation,
            variables,
            facts,
            sink,
        }
    }

    /// Name of the rule being fired.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        &self.activation.rule_name
    }

    /// The activation being fired.
    #[must_use]
    pub fn activation(&self) -> &Activation {
        self.activation
    }

    /// Handle bound to a fact variable such as `"$a"`.
    #[must_use]
    pub fn handle(&self, variable: &str) -> Option<FactHandle> {
        let position = self.variables.iter().position(|v| &**v == variable)?;
        self.activation.facts.get(position).copied()
    }

    /// Fact bound to a variable.
    #[must_use]
    pub fn fact(&self, variable: &str) -> Option<&Fact> {
        let handle = self.handle(variable)?;
        self.facts.get(handle).map(|record| record.fact())
    }

    /// Fact bound to a variable, downcast to its Rust type.
    #[must_use]
    pub fn get<T: Any>(&self, variable: &str) -> Option<&T> {
        let handle = self.handle(variable)?;
        self.facts.get(handle)?.downcast::<T>()
    }

    /// Looks up any live fact by handle.
    #[must_use]
    pub fn lookup<T: Any>(&self, handle: FactHandle) -> Option<&T> {
        self.facts.get(handle)?.downcast::<T>()
    }

    /// Buffers an insert typed by the value's Rust type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> FactHandle {
        self.sink.insert(value)
    }

    /// Buffers an insert under a declared type name.
    pub fn insert_as<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> FactHandle {
        self.sink.insert_as(type_name, value)
    }

    /// Buffers an update.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle belongs to another session.
    pub fn update<T: Any + Send + Sync>(&self, handle: FactHandle, value: T) -> Result<()> {
        self.sink.update(handle, value)
    }

    /// Buffers a delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle belongs to another session.
    pub fn delete(&self, handle: FactHandle) -> Result<()> {
        self.sink.delete(handle)
    }
}
