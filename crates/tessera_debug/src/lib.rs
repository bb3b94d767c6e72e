//! Evaluation tracing for Tessera.
//!
//! This crate provides:
//! - [`Tracer`] - An event listener that records engine events, zero-cost when disabled
//! - [`TraceBuffer`] - A bounded ring of recent trace records
//! - [`HumanFormatter`] - Human-readable rendering of trace records
//! - [`TracerConfig`] - Buffer size, output, and event filtering

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod trace;

pub use config::{TraceOutput, TracerConfig};
pub use trace::{HumanFormatter, TraceBuffer, TraceBufferStats, TraceFormatter, TraceRecord, Tracer};
