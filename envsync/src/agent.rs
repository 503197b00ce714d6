//! Reconciler: keeps exactly one child running with the desired config.
//!
//! A single control loop serializes every input (new configs, exit statuses,
//! the restart timer and cancellation). Each child lifetime runs on its own
//! task and reports back through the status channel, tagged with the
//! generation that started it.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::diff::diff_configs;
use crate::core::retry::{RetryDecision, RetryState};
use crate::core::types::{Config, EnvFile, ExitStatus, StatusEvent, StopReason};
use crate::error::AgentError;
use crate::io::artifacts::{normalize_generated, remove_generated};
use crate::io::config::AgentConfig;
use crate::io::process::ProcessRunner;

const STATUS_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_retries: u32,
    pub initial_retry_interval: Duration,
    pub grace_period: Duration,
    pub once: bool,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_retry_interval: cfg.initial_retry_interval(),
            grace_period: cfg.grace_period(),
            once: cfg.once,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

pub struct Agent {
    runner: ProcessRunner,
    retry: RetryState,
    desired: Option<Config>,
    current: Option<Config>,
    generation: u64,
    /// Whether the current generation's terminal status is still outstanding.
    awaiting_status: bool,
    terminate_tx: Option<mpsc::Sender<StopReason>>,
    previous: Option<JoinHandle<()>>,
    status_tx: mpsc::Sender<StatusEvent>,
    status_rx: mpsc::Receiver<StatusEvent>,
}

impl Agent {
    pub fn new(settings: AgentSettings) -> Self {
        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            runner: ProcessRunner::new(settings.grace_period, settings.once),
            retry: RetryState::new(settings.max_retries, settings.initial_retry_interval),
            desired: None,
            current: None,
            generation: 0,
            awaiting_status: false,
            terminate_tx: None,
            previous: None,
            status_tx,
            status_rx,
        }
    }

    /// Drive the child until it finishes, the retry budget runs out, or
    /// `cancel` fires.
    pub async fn run(
        mut self,
        mut configs: mpsc::Receiver<Config>,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        let mut configs_open = true;
        loop {
            let restart_at = self.retry.scheduled_restart.map(Instant::from_std);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    discard_pending(&mut configs);
                    return Ok(());
                }
                event = self.status_rx.recv() => {
                    let Some(event) = event else { continue };
                    if let Some(outcome) = self.on_status(event) {
                        self.finish().await;
                        discard_pending(&mut configs);
                        return outcome;
                    }
                }
                config = configs.recv(), if configs_open => match config {
                    Some(config) => self.on_config(config),
                    None => {
                        debug!("config producer closed");
                        configs_open = false;
                    }
                },
                _ = sleep_until(restart_at.unwrap_or_else(Instant::now)), if restart_at.is_some() => {
                    info!(budget = self.retry.budget, "restart timer fired");
                    self.reconcile();
                }
            }
        }
    }

    fn on_config(&mut self, next: Config) {
        let diff = diff_configs(self.current.as_ref(), &next, normalize_generated);
        if !diff.needs_restart() {
            if diff.reload_files.is_empty() {
                debug!("config unchanged");
                remove_generated(&next.generated);
            } else {
                info!(files = ?diff.reload_files, "env files changed, child reloads them itself");
                self.adopt_env_files(next, &diff.reload_files);
            }
            return;
        }

        info!(
            restart_files = ?diff.restart_files,
            os_env_vars = diff.os_env_vars,
            args = diff.args,
            generation = self.generation,
            "config changed"
        );
        self.desired = Some(next);
        self.retry.reset();
        self.request_stop(StopReason::ConfigUpdated);
        self.reconcile();
    }

    /// Record hot-reloaded env files without touching the running child.
    ///
    /// Unchanged files keep their current version, which is what is on disk.
    /// Generated files that neither the child's args and environment nor any
    /// env file on disk reference any more are removed.
    fn adopt_env_files(&mut self, next: Config, changed: &[PathBuf]) {
        let Some(current) = self.current.as_mut() else {
            remove_generated(&next.generated);
            return;
        };
        let env_files: Vec<EnvFile> = next
            .env_files
            .into_iter()
            .map(|file| {
                if changed.contains(&file.path) {
                    return file;
                }
                current
                    .env_files
                    .iter()
                    .find(|old| old.path == file.path)
                    .cloned()
                    .unwrap_or(file)
            })
            .collect();

        let mut candidates = std::mem::take(&mut current.generated);
        candidates.extend(next.generated);
        let (kept, stale): (Vec<PathBuf>, Vec<PathBuf>) =
            candidates.into_iter().partition(|path| {
                let path = path.to_string_lossy();
                current
                    .args
                    .iter()
                    .chain(&current.os_env_vars)
                    .any(|text| text.contains(path.as_ref()))
                    || env_files.iter().any(|file| file.content.contains(path.as_ref()))
            });
        debug!(kept = kept.len(), removed = stale.len(), "pruned generated files");
        remove_generated(&stale);

        current.env_files = env_files;
        current.generated = kept;
        self.desired = Some(current.clone());
    }

    fn on_status(&mut self, event: StatusEvent) -> Option<Result<(), AgentError>> {
        if event.generation != self.generation {
            debug!(
                generation = event.generation,
                current = self.generation,
                status = ?event.status,
                "ignoring stale status"
            );
            return None;
        }
        if !event.status.is_terminal() {
            return None;
        }
        self.awaiting_status = false;
        match event.status {
            ExitStatus::Hold | ExitStatus::ConfigUpdated => None,
            ExitStatus::Finished => {
                info!(generation = event.generation, "child finished");
                Some(Ok(()))
            }
            ExitStatus::Exited { code, error } => {
                match self.retry.on_unexpected_exit(std::time::Instant::now()) {
                    Ok(RetryDecision::Scheduled { delay, .. }) => {
                        warn!(
                            ?code,
                            error = error.as_deref().unwrap_or(""),
                            delay_ms = delay.as_millis() as u64,
                            budget = self.retry.budget,
                            "child exited unexpectedly, restart scheduled"
                        );
                        None
                    }
                    Ok(RetryDecision::AlreadyScheduled) => None,
                    Err(err) => {
                        error!(?code, err = %err, "giving up on child");
                        Some(Err(err))
                    }
                }
            }
        }
    }

    /// Start the desired config as a new generation.
    ///
    /// The child is spawned only after the previous generation's task has
    /// completed; generated files of the replaced config are removed then.
    fn reconcile(&mut self) {
        self.retry.clear_schedule();
        let Some(desired) = self.desired.clone() else {
            return;
        };
        let (terminate_tx, mut terminate_rx) = mpsc::channel(1);
        self.terminate_tx = Some(terminate_tx);

        let stale: Vec<PathBuf> = match self.current.replace(desired.clone()) {
            Some(old) => old
                .generated
                .into_iter()
                .filter(|path| !desired.generated.contains(path))
                .collect(),
            None => Vec::new(),
        };

        self.generation += 1;
        self.awaiting_status = true;
        let generation = self.generation;
        let previous = self.previous.take();
        let runner = self.runner.clone();
        let status_tx = self.status_tx.clone();
        debug!(generation, "scheduling child start");
        self.previous = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = previous.await {
                    warn!(err = %err, "previous child task failed");
                }
            }
            remove_generated(&stale);
            let status = runner.run(generation, &desired, &mut terminate_rx).await;
            if status_tx
                .send(StatusEvent { generation, status })
                .await
                .is_err()
            {
                debug!(generation, "agent gone before status delivery");
            }
        }));
    }

    /// Ask the current generation to stop. Repeated requests are dropped.
    fn request_stop(&self, reason: StopReason) {
        let Some(tx) = &self.terminate_tx else {
            return;
        };
        if let Err(err) = tx.try_send(reason) {
            debug!(?reason, err = %err, "stop request not delivered");
        }
    }

    async fn shutdown(&mut self) {
        info!(generation = self.generation, "shutting down");
        self.retry.clear_schedule();
        self.request_stop(StopReason::Shutdown);
        if !self.awaiting_status && !self.runner.is_active() {
            self.finish().await;
            return;
        }
        while let Some(event) = self.status_rx.recv().await {
            if event.generation == self.generation {
                info!(status = ?event.status, "child stopped");
                break;
            }
        }
        self.awaiting_status = false;
        self.finish().await;
    }

    /// Release the last child task and its generated files.
    async fn finish(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(err) = previous.await {
                warn!(err = %err, "child task failed");
            }
        }
        if let Some(current) = self.current.take() {
            remove_generated(&current.generated);
        }
    }
}

/// Close the config channel and drop queued configs with their generated files.
fn discard_pending(configs: &mut mpsc::Receiver<Config>) {
    configs.close();
    while let Ok(config) = configs.try_recv() {
        remove_generated(&config.generated);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::io::artifacts::ArtifactDir;
    use crate::test_support::{shell_config, with_env_file};

    fn settings(max_retries: u32) -> AgentSettings {
        AgentSettings {
            max_retries,
            initial_retry_interval: Duration::from_millis(10),
            grace_period: Duration::from_secs(2),
            once: false,
        }
    }

    fn start_count(log: &Path) -> usize {
        fs::read_to_string(log).map_or(0, |text| text.lines().count())
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    fn logging_config(log: &Path, tail: &str) -> Config {
        shell_config(&format!("echo start >> {}; {tail}", log.display()))
    }

    #[tokio::test]
    async fn restarts_only_on_meaningful_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let base = logging_config(&log, "sleep 30");
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(Agent::new(settings(3)).run(rx, cancel.clone()));

        tx.send(with_env_file(base.clone(), "/etc/app.env", "A=1\n", true))
            .await
            .expect("send");
        assert!(wait_until(|| start_count(&log) == 1).await);

        tx.send(with_env_file(base.clone(), "/etc/app.env", "A=1\n", true))
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(start_count(&log), 1);

        tx.send(with_env_file(base, "/etc/app.env", "A=2\n", true))
            .await
            .expect("send");
        assert!(wait_until(|| start_count(&log) == 2).await);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .expect("shutdown in time")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn hot_reload_change_keeps_child() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let base = logging_config(&log, "sleep 30");
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(Agent::new(settings(3)).run(rx, cancel.clone()));

        tx.send(with_env_file(base.clone(), "/etc/flags.env", "BETA=0\n", false))
            .await
            .expect("send");
        assert!(wait_until(|| start_count(&log) == 1).await);
        tx.send(with_env_file(base, "/etc/flags.env", "BETA=1\n", false))
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(start_count(&log), 1);

        cancel.cancel();
        agent.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn hot_reload_keeps_only_referenced_generated_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let artifacts = ArtifactDir::new(temp.path().join("artifacts"));
        let version = |n: usize| {
            let arg_file = artifacts.create("client-key").expect("arg file");
            let flags_file = artifacts.create(&format!("flags v{n}")).expect("flags file");
            let mut config = logging_config(&log, "sleep 30");
            config.args.push(arg_file.display().to_string());
            config.generated = vec![arg_file.clone(), flags_file.clone()];
            let config = with_env_file(
                config,
                "/etc/flags.env",
                &format!("FLAGS={}\n", flags_file.display()),
                false,
            );
            (config, arg_file, flags_file)
        };

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(Agent::new(settings(1)).run(rx, cancel.clone()));

        let (first, running_arg, _) = version(0);
        tx.send(first).await.expect("send");
        assert!(wait_until(|| start_count(&log) == 1).await);

        let mut superseded = Vec::new();
        let mut latest = None;
        for n in 1..=5 {
            let (config, arg_file, flags_file) = version(n);
            tx.send(config).await.expect("send");
            superseded.push(arg_file);
            if let Some(previous) = latest.replace(flags_file) {
                superseded.push(previous);
            }
        }
        let latest = latest.expect("latest flags file");
        assert!(wait_until(|| superseded.iter().all(|path| !path.exists())).await);
        assert!(latest.exists());
        assert!(running_arg.exists());
        assert_eq!(
            fs::read_dir(artifacts.path()).expect("artifacts").count(),
            2,
            "only the running arg file and the latest flags file remain"
        );
        assert_eq!(start_count(&log), 1);

        cancel.cancel();
        agent.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn crash_loop_exhausts_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let (tx, rx) = mpsc::channel(1);
        let agent = tokio::spawn(Agent::new(settings(2)).run(rx, CancellationToken::new()));
        tx.send(logging_config(&log, "exit 1")).await.expect("send");

        let result = tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .expect("gave up in time")
            .expect("join");
        assert!(matches!(
            result,
            Err(AgentError::RetryBudgetExhausted { max_retries: 2 })
        ));
        assert_eq!(start_count(&log), 3);
    }

    #[tokio::test]
    async fn run_once_success_ends_agent() {
        let (tx, rx) = mpsc::channel(1);
        let agent = tokio::spawn(
            Agent::new(AgentSettings {
                once: true,
                ..settings(0)
            })
            .run(rx, CancellationToken::new()),
        );
        tx.send(shell_config("exit 0")).await.expect("send");
        let result = tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .expect("finished in time")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancel_without_child_returns_immediately() {
        let (_tx, rx) = mpsc::channel::<Config>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            Agent::new(settings(1)).run(rx, cancel),
        )
        .await
        .expect("no wait");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unchanged_config_discards_its_generated_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let artifacts = ArtifactDir::new(temp.path().join("artifacts"));
        let first_file = artifacts.create("secret").expect("create");
        let second_file = artifacts.create("secret").expect("create");

        let with_file = |path: &PathBuf| {
            let mut config = logging_config(&log, "sleep 30");
            config.args.push(path.display().to_string());
            config.generated.push(path.clone());
            config
        };

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(Agent::new(settings(1)).run(rx, cancel.clone()));
        tx.send(with_file(&first_file)).await.expect("send");
        assert!(wait_until(|| start_count(&log) == 1).await);
        tx.send(with_file(&second_file)).await.expect("send");
        assert!(wait_until(|| !second_file.exists()).await);
        assert!(first_file.exists());
        assert_eq!(start_count(&log), 1);

        cancel.cancel();
        agent.await.expect("join").expect("clean shutdown");
        assert!(!first_file.exists());
    }

    #[tokio::test]
    async fn replacement_removes_superseded_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("starts.log");
        let artifacts = ArtifactDir::new(temp.path().join("artifacts"));
        let old_file = artifacts.create("v1").expect("create");
        let new_file = artifacts.create("v2").expect("create");

        let with_file = |path: &PathBuf| {
            let mut config = logging_config(&log, "sleep 30");
            config.os_env_vars.push(format!("CERT={}", path.display()));
            config.generated.push(path.clone());
            config
        };

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let agent = tokio::spawn(Agent::new(settings(1)).run(rx, cancel.clone()));
        tx.send(with_file(&old_file)).await.expect("send");
        assert!(wait_until(|| start_count(&log) == 1).await);
        tx.send(with_file(&new_file)).await.expect("send");
        assert!(wait_until(|| start_count(&log) == 2).await);
        assert!(!old_file.exists());
        assert!(new_file.exists());

        cancel.cancel();
        agent.await.expect("join").expect("clean shutdown");
    }
}
