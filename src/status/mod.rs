//! Status events and the Status Sink.
//!
//! Every probe loop pushes one [`StatusEvent`] per finished check into a
//! single bounded channel. The sink turns each event into one log line:
//! `info` for OK, `warn` for errors. On shutdown it drains whatever is still
//! buffered before exiting.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::desired::ProbeKey;

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: ProbeKey,
    /// Upper-case label such as `TCP` or `MYSQL_READ`
    pub target_type: String,
    pub cluster: String,
    pub host: String,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub metadata: String,
    /// Per-loop sequence number, starting at 1
    pub tick: u64,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// `status: OK | target_type: TCP | cluster: a | host: x:1 | details: ... | error: ...`
impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status: {} | target_type: {} | cluster: {}",
            self.outcome, self.target_type, self.cluster
        )?;
        if !self.host.is_empty() {
            write!(f, " | host: {}", self.host)?;
        }
        write!(f, " | details: {}", self.metadata)?;
        if let Some(error) = &self.error {
            write!(f, " | error: {error}")?;
        }
        Ok(())
    }
}

pub type StatusSender = mpsc::Sender<StatusEvent>;
pub type StatusReceiver = mpsc::Receiver<StatusEvent>;

pub fn channel(capacity: usize) -> (StatusSender, StatusReceiver) {
    mpsc::channel(capacity)
}

// ============================================================================
// Sink
// ============================================================================

/// Counters reported when the sink exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub ok: u64,
    pub errors: u64,
    /// Events observed during the shutdown drain
    pub drained: u64,
}

impl SinkStats {
    pub fn total(&self) -> u64 {
        self.ok + self.errors
    }
}

/// Consumes status events until `cancel` fires or every sender is gone.
pub struct StatusSink {
    rx: StatusReceiver,
    cancel: CancellationToken,
    stats: SinkStats,
}

impl StatusSink {
    pub fn new(rx: StatusReceiver, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            stats: SinkStats::default(),
        }
    }

    pub async fn run(mut self) -> SinkStats {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.drain();
                    break;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.record(&event),
                    None => {
                        debug!("[StatusSink] All senders closed");
                        break;
                    }
                }
            }
        }

        info!(
            ok = self.stats.ok,
            errors = self.stats.errors,
            drained = self.stats.drained,
            "[StatusSink] Stopped"
        );
        self.stats
    }

    /// Empty the buffer without waiting for new events.
    fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.stats.drained += 1;
            self.record(&event);
        }
    }

    fn record(&mut self, event: &StatusEvent) {
        match event.outcome {
            Outcome::Ok => {
                self.stats.ok += 1;
                info!(key = %event.key, tick = event.tick, "{event}");
            }
            Outcome::Error => {
                self.stats.errors += 1;
                warn!(key = %event.key, tick = event.tick, "{event}");
            }
        }
    }
}
