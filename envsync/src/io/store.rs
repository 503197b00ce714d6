//! Key/value store abstraction and the local backends.
//!
//! The [`KeyStore`] trait is the only thing the resolution engine needs from a
//! backend. Networked backends live outside this crate; [`FileStore`] backs the
//! CLI and [`MemoryStore`] backs tests and embedding.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use crate::core::key::Key;
use crate::error::StoreError;
use crate::io::atomic::write_atomic;

/// Concurrent-safe key/value store. No cross-key transactions are assumed.
pub trait KeyStore: Send + Sync {
    /// Fetch the value of `key`, or [`StoreError::NotFound`].
    fn get(&self, key: &Key) -> Result<String, StoreError>;

    fn set(&self, key: &Key, value: &str) -> Result<(), StoreError>;
}

impl<S: KeyStore + ?Sized> KeyStore for std::sync::Arc<S> {
    fn get(&self, key: &Key) -> Result<String, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &Key, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<Key, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (Key, V)>,
        V: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k, v.into())).collect();
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &Key) -> Result<String, StoreError> {
        let values = self
            .values
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        values
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn set(&self, key: &Key, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        values.insert(key.clone(), value.to_string());
        Ok(())
    }
}

/// Directory-backed store laid out as `<root>/<kind>/<name>`.
///
/// Writes go through a temp file in the same directory followed by a rename,
/// so concurrent readers never observe a partially written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &Key) -> PathBuf {
        self.root.join(key.kind.as_str()).join(&key.name)
    }
}

impl KeyStore for FileStore {
    fn get(&self, key: &Key) -> Result<String, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.clone())),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    fn set(&self, key: &Key, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        debug!(key = %key, path = %path.display(), "writing store value");
        write_atomic(&path, value.as_bytes()).map_err(|err| StoreError::io(&path, err))
    }
}
