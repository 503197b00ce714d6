//! Placeholder resolution against a [`KeyStore`].
//!
//! Rendering is not read-only: `default` provisions missing keys and
//! `overwrite` always writes. Re-rendering against a store that already holds
//! every referenced key performs no writes.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::core::key::{ActionKind, Key, KeyVal, Kind, Literal};
use crate::core::placeholder::{referenced_names, scan, substitute};
use crate::error::ResolveError;
use crate::io::artifacts::{ArtifactDir, remove_generated};
use crate::io::store::KeyStore;

/// Output of a successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Generated files created for `envf` keys, in creation order.
    pub generated: Vec<PathBuf>,
}

/// Names on the current resolution path of one top-level render.
#[derive(Debug, Default)]
struct ResolutionState {
    path: HashSet<String>,
}

/// Resolves placeholders in text against a store.
pub struct Resolver<'a, S: KeyStore + ?Sized> {
    store: &'a S,
    artifacts: &'a ArtifactDir,
}

impl<'a, S: KeyStore + ?Sized> Resolver<'a, S> {
    pub fn new(store: &'a S, artifacts: &'a ArtifactDir) -> Self {
        Self { store, artifacts }
    }

    /// Render `text`, resolving every placeholder (recursively).
    ///
    /// On error, generated files created by this call are removed.
    #[instrument(skip_all, fields(len = text.len()))]
    pub fn render(&self, text: &str) -> Result<Rendered, ResolveError> {
        let mut state = ResolutionState::default();
        let mut generated = Vec::new();
        match self.render_with(text, &mut state, &mut generated) {
            Ok(text) => Ok(Rendered { text, generated }),
            Err(err) => {
                remove_generated(&generated);
                Err(err)
            }
        }
    }

    fn render_with(
        &self,
        text: &str,
        state: &mut ResolutionState,
        generated: &mut Vec<PathBuf>,
    ) -> Result<String, ResolveError> {
        let keyvals = scan(text)?;
        if keyvals.is_empty() {
            return Ok(text.to_string());
        }

        let mut values = HashMap::with_capacity(keyvals.len());
        for keyval in keyvals {
            let value = self.resolve(&keyval)?;
            let value = self.expand(&keyval.key, value, state, generated)?;
            if value.is_empty() && keyval.key.kind.is_required() {
                return Err(ResolveError::EmptyValue(keyval.key));
            }
            let substitution = match keyval.key.kind {
                Kind::Env | Kind::Envo => value,
                Kind::Envf => {
                    let path = self.artifacts.create(&value)?;
                    let display = path.to_string_lossy().into_owned();
                    generated.push(path);
                    display
                }
            };
            values.insert(keyval.key, substitution);
        }
        Ok(substitute(text, &values))
    }

    /// Recursively render `value`, refusing to revisit a name on the current path.
    fn expand(
        &self,
        key: &Key,
        value: String,
        state: &mut ResolutionState,
        generated: &mut Vec<PathBuf>,
    ) -> Result<String, ResolveError> {
        let nested = referenced_names(&value);
        if nested.is_empty() {
            return Ok(value);
        }
        if nested.iter().any(|name| name == &key.name || state.path.contains(name)) {
            return Err(ResolveError::Cycle(key.name.clone()));
        }
        trace!(key = %key, nested = ?nested, "expanding nested references");
        state.path.insert(key.name.clone());
        let result = self.render_with(&value, state, generated);
        state.path.remove(&key.name);
        result
    }

    /// Resolve the raw value of one key according to its action.
    fn resolve(&self, keyval: &KeyVal) -> Result<String, ResolveError> {
        let key = &keyval.key;
        let literal = match (&keyval.action.literal, key.kind) {
            (Literal::Value(path), Kind::Envf) => file_literal(path)?,
            (literal, _) => literal.clone(),
        };

        let value = match keyval.action.kind {
            ActionKind::Overwrite => {
                let Some(value) = literal.as_value() else {
                    return Err(ResolveError::InvalidOverwrite(key.clone()));
                };
                debug!(key = %key, "overwriting key");
                self.store.set(key, value)?;
                value.to_string()
            }
            ActionKind::Default => match self.store.get(key) {
                Ok(value) => value,
                Err(err) if err.is_not_found() => {
                    if key.kind == Kind::Envo {
                        String::new()
                    } else if let Some(value) = literal.as_value() {
                        debug!(key = %key, "provisioning missing key with default");
                        self.store.set(key, value)?;
                        value.to_string()
                    } else {
                        String::new()
                    }
                }
                Err(err) => return Err(err.into()),
            },
        };

        if value.is_empty() && key.kind.is_required() {
            return Err(ResolveError::EmptyValue(key.clone()));
        }
        Ok(value)
    }
}

/// `envf` literals naming an existing file are replaced by the file's content.
fn file_literal(literal: &str) -> Result<Literal, ResolveError> {
    let path = Path::new(literal);
    if !path.is_file() {
        return Ok(Literal::Value(literal.to_string()));
    }
    let content = fs::read_to_string(path).map_err(|err| ResolveError::io(path, err))?;
    if content.is_empty() {
        Ok(Literal::Empty)
    } else {
        Ok(Literal::Value(content))
    }
}

/// Convenience wrapper for one-off renders.
pub fn render<S: KeyStore + ?Sized>(
    store: &S,
    artifacts: &ArtifactDir,
    text: &str,
) -> Result<Rendered, ResolveError> {
    Resolver::new(store, artifacts).render(text)
}
