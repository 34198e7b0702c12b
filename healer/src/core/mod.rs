//! Deterministic, pure logic shared by the self-heal supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod files;
pub mod outcome;
pub mod repair;
pub mod types;
