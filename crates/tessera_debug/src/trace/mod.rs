//! Evaluation tracing for Tessera sessions.
//!
//! A [`Tracer`] is an [`EventListener`]: subscribe it to a session and it
//! records every engine event into a bounded [`TraceBuffer`]. Recording
//! costs a single atomic load when the tracer is disabled.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_debug::{Tracer, TracerConfig};
//! use tessera_engine::{Configuration, Session};
//!
//! let tracer = Arc::new(Tracer::new(TracerConfig::new().enabled()));
//! let mut session = Session::new(Configuration::default());
//! session.add_listener(tracer.clone());
//! session.fire().unwrap();
//! assert_eq!(tracer.len(), 2);
//! println!("{}", tracer.format_recent(10));
//! ```

pub mod buffer;
pub mod format;
pub mod record;

pub use buffer::{TraceBuffer, TraceBufferStats};
pub use format::{HumanFormatter, TraceFormatter};
pub use record::TraceRecord;

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tessera_engine::{EngineEvent, EventListener};

use crate::config::{TraceOutput, TracerConfig};

// =============================================================================
// Tracer
// =============================================================================

#[derive(Debug)]
struct TraceState {
    buffer: TraceBuffer,
    fire: u64,
}

/// Records engine events for later inspection.
///
/// Designed for zero overhead when disabled: [`Tracer::record`] returns
/// after one relaxed load if tracing is off.
#[derive(Debug)]
pub struct Tracer {
    enabled: AtomicBool,
    config: TracerConfig,
    start_time: Instant,
    formatter: HumanFormatter,
    state: Mutex<TraceState>,
}

impl Tracer {
    /// Creates a new tracer with the given configuration.
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        let mut formatter = HumanFormatter::new().with_ids();
        formatter.show_timestamps = config.show_timestamps;
        Self {
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(TraceState {
                buffer: TraceBuffer::new(config.buffer_size),
                fire: 0,
            }),
            config,
            start_time: Instant::now(),
            formatter,
        }
    }

    /// Creates a tracer with default configuration (disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(TracerConfig::default())
    }

    /// Creates an enabled tracer that echoes to stderr.
    #[must_use]
    pub fn to_stderr() -> Self {
        Self::new(TracerConfig::new().enabled().to_stderr())
    }

    fn state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether tracing is enabled.
    #[must_use]
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables tracing.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        tracing::debug!("tracer enabled");
    }

    /// Disables tracing. Buffered records are kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        tracing::debug!("tracer disabled");
    }

    /// The configuration this tracer was built with.
    #[must_use]
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Number of `fire()` calls seen so far.
    #[must_use]
    pub fn current_fire(&self) -> u64 {
        self.state().fire
    }

    /// Records an engine event.
    #[inline]
    pub fn record(&self, event: &EngineEvent) {
        if !self.is_enabled() {
            return;
        }
        self.record_internal(event);
    }

    fn record_internal(&self, event: &EngineEvent) {
        let mut state = self.state();
        if matches!(event, EngineEvent::FireStarted { .. }) {
            state.fire += 1;
        }
        if !self.config.accepts(event.event_type()) {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        let fire = state.fire;
        let id = state.buffer.push(fire, timestamp_ns, event.clone());

        if self.config.output == TraceOutput::Stderr {
            if let Some(record) = state.buffer.get(id) {
                let line = self.formatter.format(record);
                let _ = writeln!(io::stderr().lock(), "{line}");
            }
        }
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().buffer.is_empty()
    }

    /// Runs `f` against the buffer while holding the tracer's lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&TraceBuffer) -> R) -> R {
        f(&self.state().buffer)
    }

    /// Copies of the most recent `count` records.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<TraceRecord> {
        self.with_buffer(|b| b.recent(count).into_iter().cloned().collect())
    }

    /// Copies of the records of one `fire()` call.
    #[must_use]
    pub fn records_for_fire(&self, fire: u64) -> Vec<TraceRecord> {
        self.with_buffer(|b| b.records_for_fire(fire).into_iter().cloned().collect())
    }

    /// Formats the most recent `count` records, one per line.
    #[must_use]
    pub fn format_recent(&self, count: usize) -> String {
        self.with_buffer(|b| self.formatter.format_many(&b.recent(count)))
    }

    /// Clears the trace buffer.
    pub fn clear(&self) {
        self.state().buffer.clear();
    }

    /// Returns buffer statistics.
    #[must_use]
    pub fn stats(&self) -> TraceBufferStats {
        self.state().buffer.stats()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}

impl EventListener for Tracer {
    fn on_event(&self, event: &EngineEvent) {
        self.record(event);
    }
}

// =============================================================================
// Tests
// =============================================================================
