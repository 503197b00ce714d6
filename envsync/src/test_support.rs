//! Test-only helpers: instrumented stores and config builders.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::key::Key;
use crate::core::types::{Config, EnvFile};
use crate::error::StoreError;
use crate::io::store::KeyStore;

/// Store wrapper that counts reads and writes.
#[derive(Debug, Default)]
pub struct RecordingStore<S> {
    inner: S,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl<S: KeyStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

impl<S: KeyStore> KeyStore for RecordingStore<S> {
    fn get(&self, key: &Key) -> Result<String, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set(&self, key: &Key, value: &str) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }
}

/// Store whose every call fails with a backend error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl KeyStore for FailingStore {
    fn get(&self, _key: &Key) -> Result<String, StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    fn set(&self, _key: &Key, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }
}

/// Config that runs `sh -c <script>` with a minimal environment.
pub fn shell_config(script: &str) -> Config {
    Config {
        args: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        os_env_vars: vec![format!(
            "PATH={}",
            std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string())
        )],
        ..Config::default()
    }
}

/// Add an env file to `config`.
pub fn with_env_file(mut config: Config, path: &str, content: &str, need_restart: bool) -> Config {
    config.env_files.push(EnvFile {
        path: PathBuf::from(path),
        content: content.to_string(),
        need_restart,
    });
    config
}
