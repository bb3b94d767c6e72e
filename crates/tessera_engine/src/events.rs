//! Structured engine events and their listeners.
//!
//! Listeners are notified synchronously and in subscription order. A
//! panicking listener is logged and skipped; it never disturbs matching.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::SystemTime;

use tessera_foundation::{FactHandle, Value};

use crate::activation::Activation;

/// One condition evaluation.
#[derive(Clone, Debug)]
pub struct ConditionEvaluation {
    /// Condition name.
    pub condition: Arc<str>,
    /// Argument values, in declaration order.
    pub values: Vec<Value>,
    /// Predicate outcome.
    pub outcome: bool,
    /// When the predicate returned.
    pub timestamp: SystemTime,
}

/// Something that happened inside a session.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// `fire()` began with this many buffered actions.
    FireStarted {
        /// Session id.
        session: u32,
        /// Buffered actions.
        pending: usize,
    },
    /// `fire()` finished.
    FireCompleted {
        /// Session id.
        session: u32,
        /// Cycles run.
        cycles: u32,
        /// Activations delivered.
        activations: usize,
        /// Retractions delivered.
        retractions: usize,
    },
    /// A fact entered working memory.
    FactInserted {
        /// The fact.
        handle: FactHandle,
        /// Its declared type.
        type_name: Arc<str>,
    },
    /// A fact was replaced under the same handle.
    FactUpdated {
        /// The fact.
        handle: FactHandle,
        /// Its declared type.
        type_name: Arc<str>,
    },
    /// A fact left working memory.
    FactDeleted {
        /// The fact.
        handle: FactHandle,
        /// Its declared type.
        type_name: Arc<str>,
    },
    /// A predicate ran.
    ConditionEvaluated(ConditionEvaluation),
    /// A new combination fired its rule.
    Activation(Activation),
    /// A combination stopped matching.
    Retraction(Activation),
    /// A rule was attached to a session.
    RuleDeployed {
        /// Rule name.
        rule: Arc<str>,
        /// Existing facts the rule picked up.
        backfilled: usize,
    },
    /// A rule failed to compile and was left out.
    RuleSkipped {
        /// Rule name.
        rule: Arc<str>,
        /// Why.
        reason: String,
    },
}

impl EngineEvent {
    /// Returns a short kebab-case name for the event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FireStarted { .. } => "fire-started",
            Self::FireCompleted { .. } => "fire-completed",
            Self::FactInserted { .. } => "fact-inserted",
            Self::FactUpdated { .. } => "fact-updated",
            Self::FactDeleted { .. } => "fact-deleted",
            Self::ConditionEvaluated(_) => "condition-evaluated",
            Self::Activation(_) => "activation",
            Self::Retraction(_) => "retraction",
            Self::RuleDeployed { .. } => "rule-deployed",
            Self::RuleSkipped { .. } => "rule-skipped",
        }
    }
}

/// Receives engine events.
pub trait EventListener: Send + Sync {
    /// Called for every published event.
    fn on_event(&self, event: &EngineEvent);
}

impl<F> EventListener for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event);
    }
}

/// Subscribed listeners of one session.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Returns true if nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers an event to every listener.
    pub fn publish(&self, event: &EngineEvent) {
        for listener in &self.listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if delivered.is_err() {
                tracing::warn!(event = event.event_type(), "event listener panicked");
            }
        }
    }

    /// Builds and delivers an event only if someone is listening.
    pub fn publish_with(&self, make: impl FnOnce() -> EngineEvent) {
        if !self.is_empty() {
            self.publish(&make());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
