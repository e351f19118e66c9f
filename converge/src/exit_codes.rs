//! Stable exit codes for converge CLI commands.

/// Command succeeded. A run whose phases fell back or failed still exits OK.
pub const OK: i32 = 0;
/// Invalid layout/config/state or other errors.
pub const INVALID: i32 = 1;
/// The run aborted on a fatal generation failure.
pub const ABORTED: i32 = 2;
/// The run was cancelled (Ctrl+C).
pub const CANCELLED: i32 = 130;
