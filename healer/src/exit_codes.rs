//! Stable exit codes for the `healer` and `bench` CLIs.

/// Command succeeded (or the heal loop reached a successful run).
pub const OK: i32 = 0;
/// Command failed due to invalid config/input or an unrecoverable error.
pub const INVALID: i32 = 1;
/// Every attempt failed; the best-effort files were still written.
pub const FAILED: i32 = 3;
/// The last attempt timed out; the files were written unrepaired.
pub const TIMED_OUT: i32 = 4;
