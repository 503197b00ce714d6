//! Renders the child's launch configuration from raw inputs.
//!
//! Three inputs go through the resolution engine: the argument vector (joined
//! with NUL, rendered once, re-split), each OS environment entry, and every
//! env-file template below the template root.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::types::{Config, EnvFile};
use crate::io::artifacts::{ArtifactDir, normalize_generated, remove_generated};
use crate::io::atomic::stage;
use crate::io::config::TemplatesConfig;
use crate::io::resolve::Resolver;
use crate::io::store::KeyStore;

const ARG_SEPARATOR: char = '\0';

/// Env-file templates below `root`, written to `output_root`.
#[derive(Debug, Clone)]
pub struct EnvTemplates {
    pub root: PathBuf,
    pub output_root: PathBuf,
    /// Template paths relative to `root` whose changes do not restart the child.
    pub hot_reload: HashSet<PathBuf>,
}

impl EnvTemplates {
    pub fn from_config(cfg: &TemplatesConfig) -> Option<Self> {
        cfg.root.as_ref().map(|root| Self {
            root: root.clone(),
            output_root: cfg.output_root.clone(),
            hot_reload: cfg.hot_reload.iter().cloned().collect(),
        })
    }

    /// Relative paths of every template file, sorted.
    fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("walk templates {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .with_context(|| format!("template outside root {}", entry.path().display()))?;
            found.push(relative.to_path_buf());
        }
        Ok(found)
    }
}

/// Raw inputs rendered on every poll.
#[derive(Debug, Clone, Default)]
pub struct RenderInputs {
    pub args: Vec<String>,
    pub os_env: Vec<String>,
    pub templates: Option<EnvTemplates>,
}

/// Produces a [`Config`] from [`RenderInputs`] and the store.
pub struct ConfigRenderer {
    store: Arc<dyn KeyStore>,
    artifacts: ArtifactDir,
    inputs: RenderInputs,
}

impl ConfigRenderer {
    pub fn new(store: Arc<dyn KeyStore>, artifacts: ArtifactDir, inputs: RenderInputs) -> Self {
        Self {
            store,
            artifacts,
            inputs,
        }
    }

    /// Render everything; any failure aborts the whole render.
    ///
    /// Env files are written only once all parts rendered successfully.
    #[instrument(skip_all)]
    pub fn render(&self) -> Result<Config> {
        let mut config = Config::default();
        let outcome = self
            .render_into(&mut config)
            .and_then(|()| self.write_env_files(&config.env_files));
        if let Err(err) = outcome {
            remove_generated(&config.generated);
            return Err(err);
        }
        debug!(
            args = config.args.len(),
            env = config.os_env_vars.len(),
            env_files = config.env_files.len(),
            generated = config.generated.len(),
            "rendered config"
        );
        Ok(config)
    }

    fn render_into(&self, config: &mut Config) -> Result<()> {
        let resolver = Resolver::new(self.store.as_ref(), &self.artifacts);

        let joined = self.inputs.args.join(&ARG_SEPARATOR.to_string());
        let rendered = resolver.render(&joined).context("render arguments")?;
        config.generated.extend(rendered.generated);
        if !self.inputs.args.is_empty() {
            config.args = rendered
                .text
                .split(ARG_SEPARATOR)
                .map(str::to_string)
                .collect();
        }

        for entry in &self.inputs.os_env {
            let rendered = resolver.render(entry).with_context(|| {
                let name = entry.split_once('=').map_or(entry.as_str(), |(n, _)| n);
                format!("render environment variable {name}")
            })?;
            config.generated.extend(rendered.generated);
            config.os_env_vars.push(rendered.text);
        }

        if let Some(templates) = &self.inputs.templates {
            for relative in templates.discover()? {
                let source = templates.root.join(&relative);
                let raw = fs::read_to_string(&source)
                    .with_context(|| format!("read template {}", source.display()))?;
                let rendered = resolver
                    .render(&raw)
                    .with_context(|| format!("render template {}", source.display()))?;
                config.generated.extend(rendered.generated);
                config.env_files.push(EnvFile {
                    path: templates.output_root.join(&relative),
                    content: rendered.text,
                    need_restart: !templates.hot_reload.contains(&relative),
                });
            }
        }
        Ok(())
    }

    /// Stage every changed file first so a failure leaves all of them as they were.
    fn write_env_files(&self, files: &[EnvFile]) -> Result<()> {
        let mut staged = Vec::new();
        for file in files {
            // A fresh generated path with identical content is not a change.
            if fs::read_to_string(&file.path).is_ok_and(|existing| {
                existing == file.content
                    || normalize_generated(&existing) == normalize_generated(&file.content)
            }) {
                continue;
            }
            staged.push(
                stage(&file.path, file.content.as_bytes())
                    .with_context(|| format!("write env file {}", file.path.display()))?,
            );
        }
        for file in staged {
            let path = file.path().to_path_buf();
            file.commit()
                .with_context(|| format!("replace env file {}", path.display()))?;
            info!(path = %path.display(), "env file updated");
        }
        Ok(())
    }
}
