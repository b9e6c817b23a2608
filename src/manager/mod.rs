//! Reconciler: keeps the set of running probe loops equal to the desired set.
//!
//! Each call to [`ProbeManager::reconcile`] compares the incoming probes with
//! the live map by [`ProbeKey`] and [`Fingerprint`]:
//!
//! | live map        | desired              | action                  |
//! |-----------------|----------------------|-------------------------|
//! | absent          | present              | start                   |
//! | same print      | present              | leave running           |
//! | other print     | present              | cancel old, start new   |
//! | present         | absent               | cancel and forget       |
//!
//! A probe whose settings fail to construct is skipped; if an older loop for
//! that key is running it is kept as is. Calls are serialized by one mutex,
//! which also guards [`ProbeManager::stop`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::desired::{DesiredProbe, Fingerprint, ProbeKey};
use crate::metrics::MetricsSink;
use crate::scheduler::ProbeLoop;
use crate::status::StatusSender;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("probe manager is stopped")]
    Stopped,
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<ProbeKey>,
    pub restarted: Vec<ProbeKey>,
    pub stopped: Vec<ProbeKey>,
    pub unchanged: usize,
    /// Probes that failed to construct, with the reason
    pub skipped: Vec<(ProbeKey, String)>,
    /// Repeated keys in the input; only the first occurrence counts
    pub duplicates: Vec<ProbeKey>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.restarted.is_empty()
            && self.stopped.is_empty()
            && self.skipped.is_empty()
    }
}

/// Read-only view of one running loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSnapshot {
    pub key: ProbeKey,
    pub fingerprint: Fingerprint,
    pub interval: Duration,
    /// Increases every time any loop is (re)started
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

struct RunningProbe {
    fingerprint: Fingerprint,
    interval: Duration,
    lifetime: CancellationToken,
    generation: u64,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct ManagerState {
    running: HashMap<ProbeKey, RunningProbe>,
    next_generation: u64,
    stopped: bool,
}

pub struct ProbeManager {
    root: CancellationToken,
    tracker: TaskTracker,
    status_tx: StatusSender,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<ManagerState>,
}

impl ProbeManager {
    /// Every loop lifetime is a child of `parent`, so cancelling the process
    /// token also ends all probes.
    pub fn new(
        parent: &CancellationToken,
        status_tx: StatusSender,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            root: parent.child_token(),
            tracker: TaskTracker::new(),
            status_tx,
            metrics,
            state: Mutex::new(ManagerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Probe manager lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Apply a desired probe set. Must be called from within a Tokio runtime.
    pub fn reconcile(&self, desired: Vec<DesiredProbe>) -> Result<ReconcileReport, ManagerError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(ManagerError::Stopped);
        }

        let mut report = ReconcileReport::default();
        let mut seen: HashSet<ProbeKey> = HashSet::with_capacity(desired.len());

        for probe in desired {
            if !seen.insert(probe.key.clone()) {
                warn!(key = %probe.key, "Duplicate probe key, ignoring repeat");
                report.duplicates.push(probe.key);
                continue;
            }

            let fingerprint = probe.fingerprint();
            let previous = state.running.get(&probe.key).map(|r| r.fingerprint);
            if previous == Some(fingerprint) {
                report.unchanged += 1;
                continue;
            }

            let built = match probe.build_probe() {
                Ok(built) => built,
                Err(e) => {
                    warn!(
                        key = %probe.key,
                        error = %e,
                        keeps_previous = previous.is_some(),
                        "Probe construction failed, skipping"
                    );
                    report.skipped.push((probe.key, e.to_string()));
                    continue;
                }
            };

            if let Some(old) = state.running.remove(&probe.key) {
                old.lifetime.cancel();
                info!(
                    key = %probe.key,
                    from = %old.fingerprint.short(),
                    to = %fingerprint.short(),
                    "Restarting probe with new settings"
                );
                report.restarted.push(probe.key.clone());
            } else {
                info!(key = %probe.key, interval = ?probe.interval, "Starting probe");
                report.started.push(probe.key.clone());
            }

            let lifetime = self.root.child_token();
            let looper = ProbeLoop::new(
                &probe,
                built,
                Arc::clone(&self.metrics),
                self.status_tx.clone(),
                lifetime.clone(),
            );
            self.tracker.spawn(looper.run());

            state.next_generation += 1;
            let generation = state.next_generation;
            state.running.insert(
                probe.key,
                RunningProbe {
                    fingerprint,
                    interval: probe.interval,
                    lifetime,
                    generation,
                    started_at: Utc::now(),
                },
            );
        }

        let gone: Vec<ProbeKey> = state
            .running
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(old) = state.running.remove(&key) {
                old.lifetime.cancel();
                info!(key = %key, "Stopping probe removed from config");
                report.stopped.push(key);
            }
        }

        report.started.sort();
        report.restarted.sort();
        report.stopped.sort();
        debug!(
            started = report.started.len(),
            restarted = report.restarted.len(),
            stopped = report.stopped.len(),
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            running = state.running.len(),
            "Reconcile complete"
        );
        Ok(report)
    }

    /// Cancel every loop and refuse further reconciles. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        let count = state.running.len();
        for (_, running) in state.running.drain() {
            running.lifetime.cancel();
        }
        self.root.cancel();
        self.tracker.close();
        info!(probes = count, "Probe manager stopped");
    }

    /// Wait for every loop task to finish. Returns false if `grace` ran out.
    pub async fn wait_for_shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }

    /// Live map sorted by key.
    pub fn snapshot(&self) -> Vec<ProbeSnapshot> {
        let state = self.lock();
        let mut out: Vec<ProbeSnapshot> = state
            .running
            .iter()
            .map(|(key, r)| ProbeSnapshot {
                key: key.clone(),
                fingerprint: r.fingerprint,
                interval: r.interval,
                generation: r.generation,
                started_at: r.started_at,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Loop tasks that have not exited yet, including ones being torn down.
    pub fn active_loops(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}
