//! Sidecar agent that keeps a child process in sync with a key/value store.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (placeholder grammar, config
//!   diffing, retry policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (store access, placeholder
//!   resolution, generated files, rendering, process supervision).
//!
//! Orchestration modules ([`agent`], [`watch`]) wire the two together for the
//! CLI commands.

pub mod agent;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
