//! Integration tests for Layer 2: Engine
//!
//! Tests for matching completeness, incrementality, retraction, hot
//! deployment, and exists / not-exists clauses.

mod deployment;
mod fixtures;
mod matching;
mod retraction;
