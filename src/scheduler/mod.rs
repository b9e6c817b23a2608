//! Scheduler Loop: drives one probe on a fixed interval until cancelled.
//!
//! The first tick fires one interval after start; later ticks stay on that
//! grid no matter how long checks take. Checks of one loop may overlap (up to
//! [`MAX_IN_FLIGHT_CHECKS`]) but are reported in tick order. Once the loop's
//! lifetime is cancelled nothing more is counted or emitted, in-flight checks
//! are dropped and the probe is closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::{MAX_IN_FLIGHT_CHECKS, PROBE_CLOSE_TIMEOUT};
use crate::desired::{DesiredProbe, ProbeKey, ProbeLabels};
use crate::metrics::MetricsSink;
use crate::probe::{Probe, ProbeError};
use crate::status::{Outcome, StatusEvent, StatusSender};

/// Counters reported when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub ok: u64,
    pub errors: u64,
    /// Ticks dropped because too many checks were still running
    pub skipped: u64,
    /// Events the status channel refused because the sink was gone
    pub undelivered: u64,
}

pub struct ProbeLoop {
    key: ProbeKey,
    target_type: String,
    cluster: String,
    host: String,
    interval: Duration,
    labels: ProbeLabels,
    probe: Arc<dyn Probe>,
    metrics: Arc<dyn MetricsSink>,
    status_tx: StatusSender,
    lifetime: CancellationToken,
}

impl ProbeLoop {
    pub fn new(
        desired: &DesiredProbe,
        probe: Arc<dyn Probe>,
        metrics: Arc<dyn MetricsSink>,
        status_tx: StatusSender,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            key: desired.key.clone(),
            target_type: desired.target_type(),
            cluster: desired.key.cluster.clone(),
            host: desired.host.clone(),
            interval: desired.interval,
            labels: desired.labels.clone(),
            probe,
            metrics,
            status_tx,
            lifetime,
        }
    }

    pub async fn run(self) -> LoopStats {
        let mut stats = LoopStats::default();
        let metadata = self.probe.metadata();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = FuturesOrdered::new();

        debug!(key = %self.key, interval = ?self.interval, "Probe loop started");

        loop {
            tokio::select! {
                biased;
                () = self.lifetime.cancelled() => break,
                Some((tick, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    if !self.report(tick, result, &metadata, &mut stats).await {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    stats.ticks += 1;
                    if in_flight.len() >= MAX_IN_FLIGHT_CHECKS {
                        stats.skipped += 1;
                        warn!(
                            key = %self.key,
                            in_flight = in_flight.len(),
                            "Skipping tick, too many checks still running"
                        );
                        continue;
                    }
                    in_flight.push_back(Self::check(Arc::clone(&self.probe), stats.ticks));
                }
            }
        }

        // Abandon whatever is still running before releasing clients
        drop(in_flight);
        if tokio::time::timeout(PROBE_CLOSE_TIMEOUT, self.probe.close())
            .await
            .is_err()
        {
            warn!(key = %self.key, "Probe close timed out");
        }

        info!(
            key = %self.key,
            ticks = stats.ticks,
            ok = stats.ok,
            errors = stats.errors,
            skipped = stats.skipped,
            "Probe loop stopped"
        );
        stats
    }

    async fn check(probe: Arc<dyn Probe>, tick: u64) -> (u64, Result<(), ProbeError>) {
        let limit = probe.timeout();
        let result = match tokio::time::timeout(limit, probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(limit)),
        };
        (tick, result)
    }

    /// Count and emit one outcome. Returns false once the lifetime has ended.
    async fn report(
        &self,
        tick: u64,
        result: Result<(), ProbeError>,
        metadata: &str,
        stats: &mut LoopStats,
    ) -> bool {
        if self.lifetime.is_cancelled() {
            return false;
        }

        let (outcome, error) = match result {
            Ok(()) => {
                stats.ok += 1;
                self.metrics.inc_success(&self.labels);
                (Outcome::Ok, None)
            }
            Err(e) => {
                stats.errors += 1;
                self.metrics.inc_failure(&self.labels);
                (Outcome::Error, Some(e.to_string()))
            }
        };

        let event = StatusEvent {
            key: self.key.clone(),
            target_type: self.target_type.clone(),
            cluster: self.cluster.clone(),
            host: self.host.clone(),
            outcome,
            error,
            metadata: metadata.to_string(),
            tick,
            at: Utc::now(),
        };

        // A full channel blocks only this loop, and never past cancellation
        tokio::select! {
            biased;
            () = self.lifetime.cancelled() => false,
            sent = self.status_tx.send(event) => {
                if sent.is_err() {
                    stats.undelivered += 1;
                    debug!(key = %self.key, "Status sink closed, event dropped");
                }
                true
            }
        }
    }
}
