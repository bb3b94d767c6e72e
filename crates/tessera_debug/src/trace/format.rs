//! Trace output formatters.

use std::fmt::Write;

use tessera_engine::{Activation, EngineEvent};
use tessera_foundation::FactHandle;

use super::record::TraceRecord;

// =============================================================================
// Trace Formatter Trait
// =============================================================================

/// Trait for formatting trace records.
pub trait TraceFormatter {
    /// Formats a single trace record to a string.
    fn format(&self, record: &TraceRecord) -> String;

    /// Formats multiple records, one per line.
    fn format_many(&self, records: &[&TraceRecord]) -> String {
        records
            .iter()
            .map(|r| self.format(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Human-Readable Formatter
// =============================================================================

/// Formats trace records in human-readable form.
#[derive(Clone, Debug, Default)]
pub struct HumanFormatter {
    /// Whether to include timestamps.
    pub show_timestamps: bool,
    /// Whether to include record IDs.
    pub show_ids: bool,
}

impl HumanFormatter {
    /// Creates a new human formatter with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to show timestamps.
    #[must_use]
    pub fn with_timestamps(mut self) -> Self {
        self.show_timestamps = true;
        self
    }

    /// Builder method to show record IDs.
    #[must_use]
    pub fn with_ids(mut self) -> Self {
        self.show_ids = true;
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn format_timestamp(ns: u64) -> String {
        let us = ns / 1000;
        if us >= 1_000_000 {
            format!("{:.3}s", us as f64 / 1_000_000.0)
        } else if us >= 1000 {
            format!("{:.3}ms", us as f64 / 1000.0)
        } else {
            format!("{us}us")
        }
    }

    fn facts(handles: &[FactHandle]) -> String {
        handles
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn combination(label: &str, activation: &Activation) -> String {
        format!(
            "  {label} {} [{}] key {}",
            activation.rule_name,
            Self::facts(&activation.facts),
            activation.key
        )
    }
}

impl TraceFormatter for HumanFormatter {
    fn format(&self, record: &TraceRecord) -> String {
        let mut prefix = String::new();

        if self.show_ids {
            let _ = write!(prefix, "[{:06}] ", record.id);
        }

        let _ = write!(prefix, "F{:04} ", record.fire);

        if self.show_timestamps {
            let _ = write!(
                prefix,
                "{:>10} ",
                Self::format_timestamp(record.timestamp_ns)
            );
        }

        let event_str = match &record.event {
            EngineEvent::FireStarted { session, pending } => {
                format!("=== FIRE START session {session} ({pending} pending) ===")
            }
            EngineEvent::FireCompleted {
                cycles,
                activations,
                retractions,
                ..
            } => format!(
                "=== FIRE END {cycles} cycles, {activations} activations, {retractions} retractions ==="
            ),
            EngineEvent::FactInserted { handle, type_name } => {
                format!("    INSERT {type_name} {handle}")
            }
            EngineEvent::FactUpdated { handle, type_name } => {
                format!("    UPDATE {type_name} {handle}")
            }
            EngineEvent::FactDeleted { handle, type_name } => {
                format!("    DELETE {type_name} {handle}")
            }
            EngineEvent::ConditionEvaluated(eval) => {
                let args: Vec<_> = eval.values.iter().map(ToString::to_string).collect();
                let outcome = if eval.outcome { "PASS" } else { "FAIL" };
                format!("      EVAL {}({}) {outcome}", eval.condition, args.join(", "))
            }
            EngineEvent::Activation(activation) => Self::combination("ACTIVATED", activation),
            EngineEvent::Retraction(activation) => Self::combination("RETRACTED", activation),
            EngineEvent::RuleDeployed { rule, backfilled } => {
                format!("  DEPLOYED {rule} ({backfilled} back-filled)")
            }
            EngineEvent::RuleSkipped { rule, reason } => {
                format!("  SKIPPED {rule}: {reason}")
            }
        };

        format!("{prefix}{event_str}")
    }
}

// =============================================================================
// Tests
// =============================================================================
