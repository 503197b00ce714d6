//! Agent configuration stored in `.envsync/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = ".envsync/config.toml";

/// Agent configuration (TOML).
///
/// Missing fields default to values suitable for a long-running sidecar.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Seconds between two renders of the watched configuration.
    pub poll_interval_secs: u64,

    /// Restart attempts allowed after unexpected exits of one desired config.
    pub max_retries: u32,

    /// Delay before the first restart; doubles with every further attempt.
    pub initial_retry_interval_ms: u64,

    /// Seconds between SIGTERM and SIGKILL when stopping the child.
    pub grace_period_secs: u64,

    /// Treat a zero exit code as completion instead of a crash.
    pub once: bool,

    /// Directory for generated `envf` files (system temp dir when unset).
    pub artifact_dir: Option<PathBuf>,

    pub store: StoreConfig,

    pub templates: TemplatesConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the file store.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".envsync/store"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Root of the env-file templates. No env files are rendered when unset.
    pub root: Option<PathBuf>,

    /// Rendered files land at `output_root` + path relative to `root`.
    pub output_root: PathBuf,

    /// Template paths (relative to `root`) the child reloads on its own.
    pub hot_reload: Vec<PathBuf>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            root: None,
            output_root: PathBuf::from("/"),
            hot_reload: Vec::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_retries: 5,
            initial_retry_interval_ms: 1_000,
            grace_period_secs: 10,
            once: false,
            artifact_dir: None,
            store: StoreConfig::default(),
            templates: TemplatesConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.initial_retry_interval_ms == 0 {
            return Err(anyhow!("initial_retry_interval_ms must be > 0"));
        }
        if self.grace_period_secs == 0 {
            return Err(anyhow!("grace_period_secs must be > 0"));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(anyhow!("store.path must not be empty"));
        }
        if let Some(path) = self.templates.hot_reload.iter().find(|p| p.is_absolute()) {
            return Err(anyhow!(
                "templates.hot_reload entries must be relative: {}",
                path.display()
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.initial_retry_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
