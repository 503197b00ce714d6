//! Supervised child process: spawn, wait, and graceful-then-forceful stop.
//!
//! The child leads its own process group so that termination signals reach
//! every descendant. Stdio is inherited from the agent and the environment is
//! exactly the rendered list, never the agent's own.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, instrument, warn};

use crate::core::types::{Config, ExitStatus, StopReason};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Runs one child at a time and reports its terminal status.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace_period: Duration,
    once: bool,
    active: Arc<AtomicBool>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD, false)
    }
}

impl ProcessRunner {
    pub fn new(grace_period: Duration, once: bool) -> Self {
        Self {
            grace_period,
            once,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a child is currently running (or about to be spawned).
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `config` until the child exits and return its terminal status.
    ///
    /// A request already waiting on `terminate` prevents the spawn entirely.
    #[instrument(skip_all, fields(generation = generation))]
    pub async fn run(
        &self,
        generation: u64,
        config: &Config,
        terminate: &mut mpsc::Receiver<StopReason>,
    ) -> ExitStatus {
        self.active.store(true, Ordering::SeqCst);
        let status = self.supervise(config, terminate).await;
        self.active.store(false, Ordering::SeqCst);
        debug!(?status, "process finished");
        status
    }

    async fn supervise(
        &self,
        config: &Config,
        terminate: &mut mpsc::Receiver<StopReason>,
    ) -> ExitStatus {
        if let Ok(reason) = terminate.try_recv() {
            info!(?reason, "termination requested before start, not spawning");
            return stopped(reason);
        }

        let mut child = match spawn(config) {
            Ok(child) => child,
            Err(err) => {
                error!(err = %format!("{err:#}"), "failed to spawn child");
                return ExitStatus::Exited {
                    code: None,
                    error: Some(format!("{err:#}")),
                };
            }
        };
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
        info!(pid = ?child.id(), program = %config.args[0], "child started");

        let mut stop: Option<StopReason> = None;
        let mut kill_at: Option<Instant> = None;
        let mut requests_open = true;
        loop {
            tokio::select! {
                result = child.wait() => {
                    return match stop {
                        Some(reason) => stopped(reason),
                        None => self.exited(result),
                    };
                }
                request = terminate.recv(), if stop.is_none() && requests_open => {
                    let Some(reason) = request else {
                        requests_open = false;
                        continue;
                    };
                    info!(?reason, grace_secs = self.grace_period.as_secs_f64(), "stopping child");
                    signal_group(pgid, Signal::SIGTERM);
                    stop = Some(reason);
                    kill_at = Some(Instant::now() + self.grace_period);
                }
                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    warn!(grace_secs = self.grace_period.as_secs_f64(), "child ignored SIGTERM, killing process group");
                    signal_group(pgid, Signal::SIGKILL);
                    kill_at = None;
                }
            }
        }
    }

    fn exited(&self, result: std::io::Result<std::process::ExitStatus>) -> ExitStatus {
        match result {
            Ok(status) if self.once && status.success() => {
                info!("child completed");
                ExitStatus::Finished
            }
            Ok(status) => {
                warn!(code = ?status.code(), %status, "child exited unexpectedly");
                ExitStatus::Exited {
                    code: status.code(),
                    error: (!status.success()).then(|| status.to_string()),
                }
            }
            Err(err) => {
                error!(err = %err, "failed to wait for child");
                ExitStatus::Exited {
                    code: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn stopped(reason: StopReason) -> ExitStatus {
    match reason {
        StopReason::ConfigUpdated => ExitStatus::ConfigUpdated,
        StopReason::Shutdown => ExitStatus::Finished,
    }
}

fn spawn(config: &Config) -> Result<Child> {
    let (program, args) = config
        .args
        .split_first()
        .ok_or_else(|| anyhow!("no command configured"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(config.env_pairs())
        .process_group(0)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    debug!(program = %program, args = args.len(), env = config.os_env_vars.len(), "spawning child process");
    cmd.spawn().with_context(|| format!("spawn {program}"))
}

fn signal_group(pgid: Option<Pid>, signal: Signal) {
    let Some(pgid) = pgid else {
        return;
    };
    match killpg(pgid, signal) {
        Ok(()) => debug!(pgid = pgid.as_raw(), ?signal, "signalled process group"),
        Err(Errno::ESRCH) => debug!(pgid = pgid.as_raw(), ?signal, "process group already gone"),
        Err(err) => warn!(pgid = pgid.as_raw(), ?signal, err = %err, "failed to signal process group"),
    }
}
