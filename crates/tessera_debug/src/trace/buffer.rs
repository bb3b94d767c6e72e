//! Ring buffer for trace records.
//!
//! Keeps the most recent records up to a fixed size and answers queries
//! by fire number, event type, or rule.

use std::collections::{HashMap, VecDeque};

use tessera_engine::EngineEvent;

use super::record::TraceRecord;
use crate::config::DEFAULT_BUFFER_SIZE;

// =============================================================================
// Trace Buffer
// =============================================================================

/// A ring buffer of trace records, oldest first.
#[derive(Clone, Debug)]
pub struct TraceBuffer {
    records: VecDeque<TraceRecord>,
    max_size: usize,
    /// Record IDs keep increasing across `clear`.
    next_id: u64,
    evicted: u64,
}

impl TraceBuffer {
    /// Creates a new trace buffer with the given maximum size.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
            evicted: 0,
        }
    }

    /// Pushes an event, evicting the oldest record when full.
    ///
    /// Returns the assigned record ID.
    pub fn push(&mut self, fire: u64, timestamp_ns: u64, event: EngineEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        if self.max_size == 0 {
            self.evicted += 1;
            return id;
        }
        if self.records.len() == self.max_size {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records
            .push_back(TraceRecord::new(id, fire, timestamp_ns, event));
        id
    }

    /// Returns the number of records in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records kept.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Clears all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Returns an iterator over all records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// Returns the record with this ID, if it is still buffered.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&TraceRecord> {
        let first = self.records.front()?.id;
        let offset = usize::try_from(id.checked_sub(first)?).ok()?;
        self.records.get(offset)
    }

    /// Returns records of one `fire()` call.
    #[must_use]
    pub fn records_for_fire(&self, fire: u64) -> Vec<&TraceRecord> {
        self.filter(|r| r.fire == fire)
    }

    /// Returns the most recent N records.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&TraceRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }

    /// Returns records matching a predicate.
    pub fn filter<F>(&self, predicate: F) -> Vec<&TraceRecord>
    where
        F: Fn(&TraceRecord) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Returns records of a specific event type.
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<&TraceRecord> {
        self.filter(|r| r.event_type() == event_type)
    }

    /// Returns records about one rule.
    #[must_use]
    pub fn by_rule(&self, rule: &str) -> Vec<&TraceRecord> {
        self.filter(|r| r.rule_name() == Some(rule))
    }

    /// Distinct fire numbers in the buffer, in order.
    #[must_use]
    pub fn fires(&self) -> Vec<u64> {
        let mut fires: Vec<u64> = Vec::new();
        for record in &self.records {
            if fires.last() != Some(&record.fire) {
                fires.push(record.fire);
            }
        }
        fires
    }

    /// Returns statistics about the buffer.
    #[must_use]
    pub fn stats(&self) -> TraceBufferStats {
        let mut event_counts = HashMap::new();
        for record in &self.records {
            *event_counts.entry(record.event_type()).or_insert(0) += 1;
        }

        TraceBufferStats {
            record_count: self.records.len(),
            max_size: self.max_size,
            evicted: self.evicted,
            oldest_fire: self.records.front().map(|r| r.fire),
            newest_fire: self.records.back().map(|r| r.fire),
            event_counts,
        }
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

// =============================================================================
// Buffer Statistics
// =============================================================================

/// Statistics about a trace buffer.
#[derive(Clone, Debug)]
pub struct TraceBufferStats {
    /// Number of records currently in buffer.
    pub record_count: usize,
    /// Maximum buffer size.
    pub max_size: usize,
    /// Records dropped to make room since creation.
    pub evicted: u64,
    /// Fire number of the oldest record.
    pub oldest_fire: Option<u64>,
    /// Fire number of the newest record.
    pub newest_fire: Option<u64>,
    /// Count of each event type.
    pub event_counts: HashMap<&'static str, usize>,
}

// =============================================================================
// Tests
// =============================================================================
