//! Deterministic, pure logic shared by the convergence core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod assessment;
pub mod backoff;
pub mod contracts;
pub mod extract;
pub mod invariants;
pub mod repair;
pub mod scoring;
pub mod state;
pub mod types;
