//! Sidecar agent that renders a child's command line, environment and env
//! files from a key/value store and keeps the child running with them.
//!
//! Configuration lives in `.envsync/config.toml`; store values live below the
//! configured store directory (`<root>/<kind>/<name>`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use envsync::agent::{Agent, AgentSettings};
use envsync::error::AgentError;
use envsync::exit_codes;
use envsync::io::artifacts::ArtifactDir;
use envsync::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config};
use envsync::io::render::{ConfigRenderer, EnvTemplates, RenderInputs};
use envsync::io::resolve;
use envsync::io::store::{FileStore, KeyStore};
use envsync::logging;
use envsync::watch::Watcher;

#[derive(Parser)]
#[command(
    name = "envsync",
    version,
    about = "Keep a child process in sync with values from a key/value store"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the command, environment and env files, then supervise the child.
    Run {
        /// Agent configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Treat a zero exit code as completion instead of a crash.
        #[arg(long)]
        once: bool,
        /// Command and arguments, placeholders allowed.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Render one template file to stdout against the configured store.
    Render {
        /// Agent configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            once,
            command,
        } => cmd_run(&config, once, command).await,
        Command::Render { config, file } => cmd_render(&config, &file),
    }
}

async fn cmd_run(config_path: &Path, once: bool, command: Vec<String>) -> Result<i32> {
    let mut cfg = load_config(config_path)?;
    cfg.once |= once;

    let store: Arc<dyn KeyStore> = Arc::new(FileStore::new(&cfg.store.path));
    let inputs = RenderInputs {
        args: command,
        os_env: std::env::vars_os()
            .map(|(name, value)| format!("{}={}", name.to_string_lossy(), value.to_string_lossy()))
            .collect(),
        templates: EnvTemplates::from_config(&cfg.templates),
    };
    let renderer = ConfigRenderer::new(store, artifact_dir(&cfg), inputs);

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone())?;

    let (tx, rx) = mpsc::channel(1);
    let watcher = {
        let watch = Watcher::new(renderer, cfg.poll_interval()).run(tx, cancel.child_token());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = watch.await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        })
    };
    info!(
        store = %cfg.store.path.display(),
        poll_secs = cfg.poll_interval_secs,
        once = cfg.once,
        "agent started"
    );
    let result = Agent::new(AgentSettings::from(&cfg)).run(rx, cancel.clone()).await;

    cancel.cancel();
    match watcher.await {
        Ok(watched) => watched?,
        Err(err) => warn!(err = %err, "watcher task failed"),
    }

    match result {
        Ok(()) => Ok(exit_codes::OK),
        Err(err @ AgentError::RetryBudgetExhausted { .. }) => {
            eprintln!("{err}");
            Ok(exit_codes::RETRY_EXHAUSTED)
        }
    }
}

fn cmd_render(config_path: &Path, file: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let store = FileStore::new(&cfg.store.path);
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let rendered = resolve::render(&store, &artifact_dir(&cfg), &text)
        .with_context(|| format!("render {}", file.display()))?;
    print!("{}", rendered.text);
    Ok(exit_codes::OK)
}

fn artifact_dir(cfg: &AgentConfig) -> ArtifactDir {
    cfg.artifact_dir
        .clone()
        .map(ArtifactDir::new)
        .unwrap_or_default()
}

/// Cancel the agent on the first SIGINT or SIGTERM.
fn cancel_on_signal(cancel: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        cancel.cancel();
    });
    Ok(())
}
