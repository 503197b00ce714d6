//! End-to-end tests wiring the watcher, renderer and agent together.
//!
//! A store value change must reach the child through a restart; values the
//! child does not depend on must not restart it.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use envsync::agent::{Agent, AgentSettings};
use envsync::core::key::{Key, Kind};
use envsync::io::artifacts::ArtifactDir;
use envsync::io::render::{ConfigRenderer, EnvTemplates, RenderInputs};
use envsync::io::store::{KeyStore, MemoryStore};
use envsync::watch::Watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn settings() -> AgentSettings {
    AgentSettings {
        max_retries: 3,
        initial_retry_interval: Duration::from_millis(20),
        grace_period: Duration::from_secs(2),
        once: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn store_change_restarts_child_with_new_value() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = temp.path().join("values.log");
    let store = Arc::new(MemoryStore::new());
    let renderer = ConfigRenderer::new(
        store.clone(),
        ArtifactDir::new(temp.path().join("artifacts")),
        RenderInputs {
            args: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo \"$VALUE\" >> {}; sleep 30", log.display()),
            ],
            os_env: vec![
                format!("PATH={}", std::env::var("PATH").unwrap_or_default()),
                "VALUE=${env:// .value | default one }".to_string(),
            ],
            templates: None,
        },
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let watcher = tokio::spawn(
        Watcher::new(renderer, Duration::from_millis(50)).run(tx, cancel.child_token()),
    );
    let agent = tokio::spawn(Agent::new(settings()).run(rx, cancel.clone()));

    assert!(eventually(|| lines(&log) == ["one"]).await);
    // Unrelated keys do not touch the child.
    store
        .set(&Key::new(Kind::Env, "unrelated"), "x")
        .expect("set");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(lines(&log), ["one"]);

    store.set(&Key::new(Kind::Env, "value"), "two").expect("set");
    assert!(eventually(|| lines(&log) == ["one", "two"]).await);

    cancel.cancel();
    agent.await.expect("join").expect("clean shutdown");
    watcher.await.expect("join").expect("clean stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn generated_file_rerenders_do_not_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = temp.path().join("starts.log");
    let artifacts = temp.path().join("artifacts");
    let templates = temp.path().join("templates");
    fs::create_dir_all(&templates).expect("mkdir");
    fs::write(
        templates.join("tls.env"),
        "CERT_FILE=${envf:// .cert | default PEM }\n",
    )
    .expect("template");

    let renderer = ConfigRenderer::new(
        Arc::new(MemoryStore::new()),
        ArtifactDir::new(&artifacts),
        RenderInputs {
            args: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo start >> {}; sleep 30", log.display()),
                "${envf:// .cert | default PEM }".to_string(),
            ],
            os_env: Vec::new(),
            templates: Some(EnvTemplates {
                root: templates,
                output_root: temp.path().join("out"),
                hot_reload: Default::default(),
            }),
        },
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let watcher = tokio::spawn(
        Watcher::new(renderer, Duration::from_millis(30)).run(tx, cancel.child_token()),
    );
    let agent = tokio::spawn(Agent::new(settings()).run(rx, cancel.clone()));

    assert!(eventually(|| lines(&log).len() == 1).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(lines(&log).len(), 1);

    let written = fs::read_to_string(temp.path().join("out/tls.env")).expect("env file");
    let cert = written
        .trim_end()
        .strip_prefix("CERT_FILE=")
        .expect("cert entry");
    assert_eq!(fs::read_to_string(cert).expect("generated file"), "PEM");

    cancel.cancel();
    agent.await.expect("join").expect("clean shutdown");
    watcher.await.expect("join").expect("clean stop");
    assert_eq!(
        fs::read_dir(&artifacts).expect("artifacts").count(),
        0,
        "generated files are cleaned up after shutdown"
    );
}
