//! I/O adapters for the self-heal loop.

pub mod attempt_log;
pub mod config;
pub mod env;
pub mod files;
pub mod generator;
pub mod memory;
pub mod process;
pub mod project;
