//! Periodic render loop feeding rendered configs to the agent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::types::Config;
use crate::error::{ResolveError, StoreError};
use crate::io::artifacts::remove_generated;
use crate::io::render::ConfigRenderer;

pub struct Watcher {
    renderer: Arc<ConfigRenderer>,
    poll_interval: Duration,
}

impl Watcher {
    pub fn new(renderer: ConfigRenderer, poll_interval: Duration) -> Self {
        Self {
            renderer: Arc::new(renderer),
            poll_interval,
        }
    }

    /// Render now and then on every tick until cancelled or the agent is gone.
    ///
    /// A failed render skips the cycle and the previous config stays in
    /// effect. Before any config was delivered, a malformed reference (cycle,
    /// unknown kind, overwrite without literal) cannot fix itself and ends the
    /// watcher with an error.
    pub async fn run(self, tx: mpsc::Sender<Config>, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("watcher cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let renderer = Arc::clone(&self.renderer);
            let rendered = match tokio::task::spawn_blocking(move || renderer.render()).await {
                Ok(rendered) => rendered,
                Err(err) => {
                    warn!(err = %err, "render task failed");
                    continue;
                }
            };
            let config = match rendered {
                Ok(config) => config,
                Err(err) if is_missing_value(&err) => {
                    info!(err = %format!("{err:#}"), "waiting for store values, skipping cycle");
                    continue;
                }
                Err(err) if !delivered && is_misconfiguration(&err) => {
                    return Err(err.context("initial render"));
                }
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "render failed, skipping cycle");
                    continue;
                }
            };

            let generated = config.generated.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    remove_generated(&generated);
                    return Ok(());
                }
                sent = tx.send(config) => {
                    if let Err(mpsc::error::SendError(config)) = sent {
                        debug!("agent gone, stopping watcher");
                        remove_generated(&config.generated);
                        return Ok(());
                    }
                    delivered = true;
                }
            }
        }
    }
}

/// Whether a render failed on a reference no store update can repair.
fn is_misconfiguration(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ResolveError>(),
            Some(
                ResolveError::Cycle(_)
                    | ResolveError::UnknownKind(_)
                    | ResolveError::InvalidOverwrite(_)
            )
        )
    })
}

/// Whether a render failed only because a value is not in the store yet.
fn is_missing_value(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(err) = cause.downcast_ref::<ResolveError>() {
            return match err {
                ResolveError::EmptyValue(_) => true,
                ResolveError::Store(store) => store.is_not_found(),
                _ => false,
            };
        }
        cause
            .downcast_ref::<StoreError>()
            .is_some_and(StoreError::is_not_found)
    })
}
