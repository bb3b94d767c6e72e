//! Trace record type.

use tessera_engine::EngineEvent;

// =============================================================================
// Trace Record
// =============================================================================

/// A timestamped engine event.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    /// Unique record ID within the tracer.
    pub id: u64,
    /// Number of the `fire()` call this event belongs to. Events seen
    /// before the first fire (deployments, inserts) carry 0.
    pub fire: u64,
    /// Nanoseconds since the tracer was created.
    pub timestamp_ns: u64,
    /// The engine event.
    pub event: EngineEvent,
}

impl TraceRecord {
    /// Creates a new trace record.
    #[must_use]
    pub fn new(id: u64, fire: u64, timestamp_ns: u64, event: EngineEvent) -> Self {
        Self {
            id,
            fire,
            timestamp_ns,
            event,
        }
    }

    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Returns true if this record opens or closes a `fire()` call.
    #[must_use]
    pub fn is_fire_boundary(&self) -> bool {
        matches!(
            self.event,
            EngineEvent::FireStarted { .. } | EngineEvent::FireCompleted { .. }
        )
    }

    /// Returns true if this record concerns a single fact.
    #[must_use]
    pub fn is_fact_event(&self) -> bool {
        matches!(
            self.event,
            EngineEvent::FactInserted { .. }
                | EngineEvent::FactUpdated { .. }
                | EngineEvent::FactDeleted { .. }
        )
    }

    /// The rule this record is about, if any.
    #[must_use]
    pub fn rule_name(&self) -> Option<&str> {
        match &self.event {
            EngineEvent::Activation(a) | EngineEvent::Retraction(a) => Some(&*a.rule_name),
            EngineEvent::RuleDeployed { rule, .. } | EngineEvent::RuleSkipped { rule, .. } => {
                Some(&**rule)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
