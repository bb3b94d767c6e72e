//! Configuration for the tracer.

/// Default number of records a tracer keeps.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Where trace output should be sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceOutput {
    /// No output (records are still kept in the buffer).
    #[default]
    None,
    /// Write each record to stderr as it arrives.
    Stderr,
}

/// Configuration for a [`Tracer`](crate::Tracer).
#[derive(Clone, Debug)]
pub struct TracerConfig {
    /// Whether tracing starts enabled.
    pub enabled: bool,
    /// Maximum records to keep in the buffer.
    pub buffer_size: usize,
    /// Where to echo records.
    pub output: TraceOutput,
    /// Event types to keep (empty = all). Names are the kebab-case
    /// values of `EngineEvent::event_type`.
    pub event_filter: Vec<String>,
    /// Whether echoed records carry a timestamp.
    pub show_timestamps: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            output: TraceOutput::None,
            event_filter: Vec::new(),
            show_timestamps: true,
        }
    }
}

impl TracerConfig {
    /// Creates a new tracer configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to enable tracing.
    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// Builder method to set buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Builder method to echo records to stderr.
    #[must_use]
    pub fn to_stderr(mut self) -> Self {
        self.output = TraceOutput::Stderr;
        self
    }

    /// Builder method to keep only the named event types.
    #[must_use]
    pub fn filter_events<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_filter = types.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to drop timestamps from echoed records.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.show_timestamps = false;
        self
    }

    /// Returns true if events of this type pass the filter.
    #[must_use]
    pub fn accepts(&self, event_type: &str) -> bool {
        self.event_filter.is_empty() || self.event_filter.iter().any(|t| t == event_type)
    }
}
