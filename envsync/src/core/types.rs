//! Shared types passed between the renderer, the agent and the process runner.

use std::path::PathBuf;

/// A rendered env file destined for `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    pub path: PathBuf,
    pub content: String,
    /// Whether a change to this file warrants restarting the child.
    pub need_restart: bool,
}

/// Fully substituted launch configuration for the child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub args: Vec<String>,
    pub env_files: Vec<EnvFile>,
    /// `NAME=value` entries passed verbatim as the child environment.
    pub os_env_vars: Vec<String>,
    /// Generated files created while rendering this config.
    pub generated: Vec<PathBuf>,
}

impl Config {
    /// Split `os_env_vars` into name/value pairs, skipping malformed entries.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.os_env_vars
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(name, _)| !name.is_empty())
    }
}

/// Why a termination was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A new desired config replaces the running process.
    ConfigUpdated,
    /// The agent is shutting down.
    Shutdown,
}

/// Status of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Still running. Never delivered as a terminal status.
    Hold,
    /// Intentional stop: shutdown or run-once completion.
    Finished,
    /// Side effect of a config-driven restart, not a real exit.
    ConfigUpdated,
    /// Unexpected exit (including spawn failures).
    Exited {
        code: Option<i32>,
        error: Option<String>,
    },
}

impl ExitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExitStatus::Hold)
    }
}

/// Terminal status tagged with the generation of the process that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub generation: u64,
    pub status: ExitStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_split_on_first_equals() {
        let config = Config {
            os_env_vars: vec![
                "A=1".to_string(),
                "B=x=y".to_string(),
                "broken".to_string(),
                "=nameless".to_string(),
                "EMPTY=".to_string(),
            ],
            ..Config::default()
        };
        let pairs: Vec<_> = config.env_pairs().collect();
        assert_eq!(pairs, vec![("A", "1"), ("B", "x=y"), ("EMPTY", "")]);
    }

    #[test]
    fn hold_is_not_terminal() {
        assert!(!ExitStatus::Hold.is_terminal());
        assert!(ExitStatus::Finished.is_terminal());
    }
}
