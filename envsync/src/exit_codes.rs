//! Stable exit codes for envsync CLI commands.

/// Command succeeded, or the supervised child finished intentionally.
pub const OK: i32 = 0;
/// Invalid configuration, render failure, or other errors.
pub const INVALID: i32 = 1;
/// `envsync run` gave up after the child exhausted its retry budget.
pub const RETRY_EXHAUSTED: i32 = 3;
