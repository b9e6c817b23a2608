//! Fleet Prober - continuous health probing from a hot-reloadable config
//!
//! # Usage
//!
//! ```bash
//! # Probe everything in config.toml, expose metrics on 127.0.0.1:2112
//! fleet-prober config.toml
//!
//! # Show the probe set a config expands to, then exit
//! fleet-prober config.toml plan
//! ```
//!
//! # Environment Variables
//!
//! - `PROBER_CONFIG`: config path (default: config.toml)
//! - `PROBER_METRICS_ADDR`: metrics listen address (default: 127.0.0.1:2112)
//! - `SOURCE_REGION`, `NODE_NAME`, `NODE_IP`: identity attached to metrics
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleet_prober::api::create_app;
use fleet_prober::config::defaults::{
    CONFIG_PATH, METRICS_ADDR, SHUTDOWN_GRACE, STATUS_CHANNEL_CAPACITY,
};
use fleet_prober::config::watcher::{load_with_digest, run_config_watcher, ConfigEvent, WatcherOptions};
use fleet_prober::config::{ProberConfig, SourceIdentity};
use fleet_prober::desired::expand;
use fleet_prober::manager::ProbeManager;
use fleet_prober::metrics::ProberMetrics;
use fleet_prober::status::{self, StatusSink};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fleet-prober")]
#[command(about = "Continuous health probing of TCP, HTTP, S3, MySQL, Kafka and Redis targets")]
#[command(version)]
struct CliArgs {
    /// Path to the probe config (TOML)
    #[arg(env = "PROBER_CONFIG", default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Listen address for /metrics and /healthz
    #[arg(long, env = "PROBER_METRICS_ADDR", default_value = METRICS_ADDR)]
    metrics_addr: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Load and expand the config, print the probe set, and exit
    Plan,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    StatusSink,
    ConfigWatcher,
    ReloadHandler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::StatusSink => write!(f, "StatusSink"),
            TaskName::ConfigWatcher => write!(f, "ConfigWatcher"),
            TaskName::ReloadHandler => write!(f, "ReloadHandler"),
        }
    }
}

// ============================================================================
// Reconcile entry point
// ============================================================================

fn apply_config(manager: &ProbeManager, config: &ProberConfig, source: &SourceIdentity) {
    let desired = expand(config, source);
    let total = desired.len();
    match manager.reconcile(desired) {
        Ok(report) => info!(
            probes = total,
            started = report.started.len(),
            restarted = report.restarted.len(),
            stopped = report.stopped.len(),
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "Config applied"
        ),
        Err(e) => warn!(error = %e, "Config not applied"),
    }
}

fn run_plan(path: &Path, source: &SourceIdentity) -> Result<()> {
    let config = ProberConfig::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let desired = expand(&config, source);

    println!("{} probes from {}", desired.len(), path.display());
    for probe in &desired {
        println!(
            "{:<48} every {:<8} {} {}",
            probe.key.to_string(),
            humantime::format_duration(probe.interval).to_string(),
            probe.fingerprint().short(),
            probe.host
        );
    }
    Ok(())
}

// ============================================================================
// Tasks
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Applies every reloaded config. Errors leave the running probes alone.
fn spawn_reload_handler(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut events: mpsc::Receiver<ConfigEvent>,
    manager: Arc<ProbeManager>,
    source: SourceIdentity,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[ReloadHandler] Task starting");
        loop {
            let event = tokio::select! {
                () = cancel_token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                ConfigEvent::Reloaded(config) => {
                    info!("[ReloadHandler] Config changed, reconciling");
                    apply_config(&manager, &config, &source);
                }
                ConfigEvent::Error(message) => {
                    warn!(error = %message, "[ReloadHandler] Keeping last good config");
                }
            }
        }
        Ok(TaskName::ReloadHandler)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, initiating shutdown"),
                        _ = term.recv() => info!("Received SIGTERM, initiating shutdown"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    tokio::signal::ctrl_c().await.ok();
                    info!("Received Ctrl+C, initiating shutdown");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("Received Ctrl+C, initiating shutdown");
        }
        token.cancel();
    });
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.json_logs);

    let source = SourceIdentity::from_env();

    if let Some(SubCommand::Plan) = args.command {
        return run_plan(&args.config, &source);
    }

    info!(
        config = %args.config.display(),
        region = %source.region,
        node = %source.node_name,
        ip = %source.node_ip,
        "Fleet prober starting"
    );

    let metrics = Arc::new(ProberMetrics::new(&source).context("Failed to create metrics registry")?);
    let listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics address {}", args.metrics_addr))?;
    info!(addr = %args.metrics_addr, "Serving /metrics and /healthz");

    let cancel_token = CancellationToken::new();
    spawn_signal_handler(cancel_token.clone());

    let (status_tx, status_rx) = status::channel(STATUS_CHANNEL_CAPACITY);
    let manager = Arc::new(ProbeManager::new(&cancel_token, status_tx, metrics.clone()));

    // A broken initial config is not fatal: the watcher picks up the first good one
    let initial_digest = match load_with_digest(&args.config) {
        Ok((config, digest)) => {
            apply_config(&manager, &config, &source);
            Some(digest)
        }
        Err(e) => {
            warn!(error = %e, "Initial config load failed, starting with no probes");
            None
        }
    };

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    spawn_http_server(&mut task_set, listener, create_app(metrics), cancel_token.clone());

    let sink = StatusSink::new(status_rx, cancel_token.clone());
    task_set.spawn(async move {
        info!("[StatusSink] Task starting");
        sink.run().await;
        Ok(TaskName::StatusSink)
    });

    let (config_tx, config_rx) = mpsc::channel(4);
    let watcher_path = args.config.clone();
    let watcher_cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_config_watcher(
            watcher_path,
            initial_digest,
            WatcherOptions::default(),
            config_tx,
            watcher_cancel,
        )
        .await;
        Ok(TaskName::ConfigWatcher)
    });

    spawn_reload_handler(
        &mut task_set,
        config_rx,
        Arc::clone(&manager),
        source.clone(),
        cancel_token.clone(),
    );

    let outcome = run_supervisor(&mut task_set, cancel_token.clone()).await;

    manager.stop();
    if !manager.wait_for_shutdown(SHUTDOWN_GRACE).await {
        warn!(
            remaining = manager.active_loops(),
            "Probe loops did not stop within the shutdown grace period"
        );
    }

    // Let the sink drain and the server finish
    cancel_token.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while task_set.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Background tasks did not finish in time");
    }

    info!("Fleet prober shutdown complete");
    outcome
}
