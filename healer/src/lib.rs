//! Self-healing execution loop for generated programs.
//!
//! A generated codebase is run through its entrypoint, the outcome is classified,
//! and failures are fed back to a generator as repair instructions until the program
//! runs, times out, or the attempt budget is spent. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (FileSet, exit model, outcome
//!   classification, repair prompts). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (processes, workspaces, config, generator
//!   backends, attempt logs). Behind traits so tests can script them.
//!
//! [`heal`] holds the supervisor state machine and [`agent`] composes generation,
//! entrypoint generation and healing into the `init`/`improve` contract.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod heal;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
