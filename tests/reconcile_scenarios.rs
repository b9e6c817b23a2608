//! Reconcile Scenarios
//!
//! End-to-end runs of config -> expand -> reconcile -> probe loops -> status
//! events, against real local TCP listeners.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fleet_prober::config::watcher::{load_with_digest, run_config_watcher, ConfigEvent, WatcherOptions};
use fleet_prober::config::{ProberConfig, SourceIdentity};
use fleet_prober::metrics::ProberMetrics;
use fleet_prober::status::{self, StatusEvent, StatusReceiver};
use fleet_prober::{expand, ProbeKey, ProbeKind, ProbeManager, Task};

struct Fixture {
    manager: ProbeManager,
    metrics: Arc<ProberMetrics>,
    rx: StatusReceiver,
    _root: CancellationToken,
}

fn fixture() -> Fixture {
    let root = CancellationToken::new();
    let (tx, rx) = status::channel(256);
    let metrics = Arc::new(ProberMetrics::new(&SourceIdentity::default()).unwrap());
    let manager = ProbeManager::new(&root, tx, metrics.clone());
    Fixture {
        manager,
        metrics,
        rx,
        _root: root,
    }
}

fn tcp_config(name: &str, addr: &str, duration: &str) -> ProberConfig {
    ProberConfig::from_toml_str(&format!(
        r#"
[[tcp.clusters]]
name = "{name}"
addresses = ["{addr}"]
region = "eu-west"
duration = "{duration}"
"#
    ))
    .unwrap()
}

fn drain(rx: &mut StatusReceiver) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

async fn wait_for_loops(manager: &ProbeManager, count: usize) {
    for _ in 0..100 {
        if manager.active_loops() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} live loops, have {}", manager.active_loops());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn three_ticks_then_nothing_after_removal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mut f = fixture();
    let source = SourceIdentity::default();

    let report = f
        .manager
        .reconcile(expand(&tcp_config("a", &addr, "200ms"), &source))
        .unwrap();
    assert_eq!(report.started, vec![ProbeKey::new(ProbeKind::Tcp, Task::Probe, "a")]);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let events = drain(&mut f.rx);
    assert!(
        (3..=4).contains(&events.len()),
        "expected about 3 events, got {}",
        events.len()
    );
    for event in &events {
        assert_eq!(event.key.cluster, "a");
        assert!(event.is_ok(), "{event}");
        assert_eq!(event.target_type, "TCP");
        assert_eq!(event.host, addr);
    }

    let report = f.manager.reconcile(Vec::new()).unwrap();
    assert_eq!(report.stopped.len(), 1);
    wait_for_loops(&f.manager, 0).await;
    drain(&mut f.rx);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(drain(&mut f.rx).is_empty());
}

#[tokio::test]
async fn successes_and_failures_reach_the_counters() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up = listener.local_addr().unwrap().to_string();
    let closed = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().to_string()
    };
    let mut f = fixture();
    let source = SourceIdentity::default();

    let mut config = tcp_config("up", &up, "100ms");
    config
        .tcp
        .clusters
        .extend(tcp_config("down", &closed, "100ms").tcp.clusters);
    let desired = expand(&config, &source);
    let labels: Vec<_> = desired.iter().map(|d| d.labels.clone()).collect();
    f.manager.reconcile(desired).unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    f.manager.stop();
    assert!(f.manager.wait_for_shutdown(Duration::from_secs(3)).await);

    assert!(f.metrics.success_count(&labels[0]) >= 3);
    assert_eq!(f.metrics.failure_count(&labels[0]), 0);
    assert!(f.metrics.failure_count(&labels[1]) >= 3);

    let failures: Vec<_> = drain(&mut f.rx)
        .into_iter()
        .filter(|e| !e.is_ok())
        .collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|e| e.cluster == "down"));
    assert!(failures[0].error.as_deref().unwrap().contains("dial error"));
}

// ============================================================================
// Reconcile semantics
// ============================================================================

#[tokio::test]
async fn reapplying_the_same_config_changes_nothing() {
    let mut f = fixture();
    let source = SourceIdentity::default();
    let config = tcp_config("a", "127.0.0.1:9", "1s");

    f.manager.reconcile(expand(&config, &source)).unwrap();
    let before = f.manager.snapshot();

    for _ in 0..3 {
        let report = f.manager.reconcile(expand(&config, &source)).unwrap();
        assert!(report.is_noop());
    }
    assert_eq!(f.manager.snapshot(), before);
    assert_eq!(f.manager.active_loops(), 1);
    drain(&mut f.rx);
}

#[tokio::test]
async fn timeout_change_restarts_and_region_change_restarts() {
    let f = fixture();
    let source = SourceIdentity::default();

    f.manager
        .reconcile(expand(&tcp_config("a", "127.0.0.1:9", "1s"), &source))
        .unwrap();

    let mut slower = tcp_config("a", "127.0.0.1:9", "1s");
    slower.tcp.clusters[0].timeout = "750ms".into();
    let report = f.manager.reconcile(expand(&slower, &source)).unwrap();
    assert_eq!(report.restarted.len(), 1);

    let mut moved = slower.clone();
    moved.tcp.clusters[0].region = "us-east".into();
    let report = f.manager.reconcile(expand(&moved, &source)).unwrap();
    assert_eq!(report.restarted.len(), 1);

    wait_for_loops(&f.manager, 1).await;
}

#[tokio::test]
async fn changing_one_cluster_leaves_the_others_running() {
    let f = fixture();
    let source = SourceIdentity::default();

    let mut config = tcp_config("a", "127.0.0.1:9", "1s");
    for name in ["b", "c"] {
        config
            .tcp
            .clusters
            .extend(tcp_config(name, "127.0.0.1:9", "1s").tcp.clusters);
    }
    f.manager.reconcile(expand(&config, &source)).unwrap();
    let before = f.manager.snapshot();
    assert_eq!(before.len(), 3);

    config.tcp.clusters[1].timeout = "750ms".into();
    let report = f.manager.reconcile(expand(&config, &source)).unwrap();
    assert_eq!(report.restarted, vec![ProbeKey::new(ProbeKind::Tcp, Task::Probe, "b")]);
    assert_eq!(report.unchanged, 2);
    assert!(report.started.is_empty() && report.stopped.is_empty());

    let after = f.manager.snapshot();
    assert_eq!(after.len(), 3);
    for (old, new) in before.iter().zip(&after) {
        if old.key.cluster == "b" {
            assert!(new.generation > old.generation);
            assert_ne!(new.fingerprint, old.fingerprint);
        } else {
            assert_eq!(new.generation, old.generation);
            assert_eq!(new.started_at, old.started_at);
            assert_eq!(new, old);
        }
    }
    wait_for_loops(&f.manager, 3).await;
}

#[tokio::test]
async fn invalid_cluster_does_not_block_the_rest() {
    let f = fixture();
    let source = SourceIdentity::default();
    let config = ProberConfig::from_toml_str(
        r#"
[[tcp.clusters]]
name = "good"
addresses = ["127.0.0.1:9"]

[[tcp.clusters]]
name = "bad"
addresses = ["no-port-here"]

[[http.clusters]]
name = "bad-url"
endpoint = "not a url"
"#,
    )
    .unwrap();

    let report = f.manager.reconcile(expand(&config, &source)).unwrap();
    assert_eq!(report.started.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(f.manager.snapshot()[0].key.cluster, "good");
}

// ============================================================================
// Hot reload
// ============================================================================

#[tokio::test]
async fn reload_applies_new_config_and_survives_bad_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[[tcp.clusters]]\nname = \"a\"\naddresses = [\"127.0.0.1:9\"]\nduration = \"1s\"\n").unwrap();

    let f = fixture();
    let source = SourceIdentity::default();
    let (initial, digest) = load_with_digest(&path).unwrap();
    f.manager.reconcile(expand(&initial, &source)).unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    tokio::spawn(run_config_watcher(
        path.clone(),
        Some(digest),
        WatcherOptions {
            poll_interval: Duration::from_millis(20),
            debounce: Duration::from_millis(10),
            error_reannounce: Duration::from_millis(100),
        },
        tx,
        cancel.clone(),
    ));

    // Broken edit: nothing changes
    std::fs::write(&path, "[[tcp.clusters]\nname = ").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ConfigEvent::Error(_)));
    assert_eq!(f.manager.snapshot().len(), 1);

    // Good edit: "a" goes away, "b" appears
    std::fs::write(&path, "[[tcp.clusters]]\nname = \"b\"\naddresses = [\"127.0.0.1:9\"]\nduration = \"1s\"\n").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    let ConfigEvent::Reloaded(config) = event else {
        panic!("expected reload");
    };
    let report = f.manager.reconcile(expand(&config, &source)).unwrap();
    assert_eq!(report.started[0].cluster, "b");
    assert_eq!(report.stopped[0].cluster, "a");

    cancel.cancel();
    f.manager.stop();
    assert!(f.manager.wait_for_shutdown(Duration::from_secs(3)).await);
}
