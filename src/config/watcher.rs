//! Polling-based config file watcher.
//!
//! Reads the config file every 2 seconds and compares a SHA-256 digest of its
//! contents with the last digest seen. Comparing contents instead of mtimes
//! also catches Kubernetes ConfigMap updates, which swap a symlink and may
//! leave the visible mtime untouched. When a change is detected it debounces
//! for 500ms (to handle partial writes from editors), re-reads, parses, and
//! sends the result via an mpsc channel.
//!
//! A failed parse is reported once as [`ConfigEvent::Error`] and then
//! re-announced in the log every 30 seconds for as long as it persists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::defaults::{CONFIG_DEBOUNCE_DELAY, CONFIG_ERROR_REANNOUNCE, CONFIG_POLL_INTERVAL};
use super::{ConfigError, ProberConfig};

/// Events emitted by the config watcher.
#[derive(Debug)]
pub enum ConfigEvent {
    /// The file changed and parsed cleanly.
    Reloaded(Box<ProberConfig>),
    /// The file changed but could not be loaded (previous config stays active).
    Error(String),
}

/// Timing knobs, overridable for tests.
#[derive(Debug, Clone, Copy)]
pub struct WatcherOptions {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub error_reannounce: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: CONFIG_POLL_INTERVAL,
            debounce: CONFIG_DEBOUNCE_DELAY,
            error_reannounce: CONFIG_ERROR_REANNOUNCE,
        }
    }
}

/// The error currently blocking reloads.
struct PersistentError {
    message: String,
    since: DateTime<Utc>,
    last_announced: Instant,
}

/// Run the config file watcher loop.
///
/// `initial` is the digest of the contents the caller already loaded, so the
/// first poll does not re-announce them; pass `None` to treat whatever is on
/// disk as new. Returns when `cancel` fires or the receiver is dropped.
pub async fn run_config_watcher(
    path: PathBuf,
    initial: Option<[u8; 32]>,
    options: WatcherOptions,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
) {
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_digest = initial;
    let mut unreadable = false;
    let mut persistent: Option<PersistentError> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled");
                return;
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
        }

        if let Some(err) = persistent.as_mut() {
            if err.last_announced.elapsed() >= options.error_reannounce {
                tracing::warn!(
                    error = %err.message,
                    "Config error persists since {}, probes continue with last good config",
                    err.since.to_rfc3339()
                );
                err.last_announced = Instant::now();
            }
        }

        let Some(current) = content_digest(&path) else {
            // Only warn on the transition to unreadable, not on every poll
            if !unreadable {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not accessible, keeping current config, will retry"
                );
                unreadable = true;
            }
            continue;
        };
        unreadable = false;

        if last_digest == Some(current) {
            continue;
        }

        // Debounce: wait, then re-check to ensure the write is complete
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(options.debounce) => {}
        }
        // Hash and parse the same read so the recorded digest is what gets applied
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        if digest(&bytes) != current {
            // Still changing, pick it up on the next poll cycle
            continue;
        }
        last_digest = Some(current);

        let event = match ProberConfig::from_file_bytes(&path, &bytes) {
            Ok(config) => {
                if persistent.take().is_some() {
                    tracing::info!(path = %path.display(), "Config error cleared");
                }
                ConfigEvent::Reloaded(Box::new(config))
            }
            Err(e) => {
                tracing::error!(error = %e, "Config hot-reload failed, keeping previous config");
                persistent = Some(PersistentError {
                    message: e.to_string(),
                    since: Utc::now(),
                    last_announced: Instant::now(),
                });
                ConfigEvent::Error(e.to_string())
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

/// SHA-256 of the file contents, or `None` when the file cannot be read.
pub fn content_digest(path: &Path) -> Option<[u8; 32]> {
    std::fs::read(path).ok().map(|bytes| digest(&bytes))
}

/// Load the config together with the digest of exactly the bytes parsed.
///
/// Hand the digest to [`run_config_watcher`] as `initial`: an edit landing
/// between the load and the watcher start is then still seen as a change.
pub fn load_with_digest(path: &Path) -> Result<(ProberConfig, [u8; 32]), ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = ProberConfig::from_file_bytes(path, &bytes)?;
    Ok((config, digest(&bytes)))
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}
