//! Integration tests for RTIO acceptance testing.
//!
//! These tests verify the timing contract of the scheduling core:
//! - Composition arithmetic (sum vs max, idempotence)
//! - Gate/count protocol
//! - Underflow detection
//! - Pacing (slack and queue bounds)

mod common;
mod composition_test;
mod gate_count_test;
mod pacing_test;
mod underflow_test;
