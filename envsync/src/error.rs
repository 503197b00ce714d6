//! Typed errors for the store, the resolution engine and the agent.
//!
//! Orchestration code wraps these in `anyhow::Error`; callers that need to
//! branch on a specific failure use `downcast_ref`.

use std::path::PathBuf;

use crate::core::key::Key;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key {0} not found")]
    NotFound(Key),

    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown key kind {0:?}")]
    UnknownKind(String),

    #[error("empty value for required key {0}")]
    EmptyValue(Key),

    #[error("overwrite with none is not allowed for key {0}")]
    InvalidOverwrite(Key),

    #[error("reference cycle detected at key {0:?}")]
    Cycle(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("generated file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("retry budget exhausted after {max_retries} restarts")]
    RetryBudgetExhausted { max_retries: u32 },
}
