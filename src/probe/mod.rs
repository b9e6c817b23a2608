//! Probe capability and the per-protocol implementations.
//!
//! A [`Probe`] runs one health check against one target and describes that
//! target for log lines. The scheduler owns the timing; a probe only knows how
//! to execute a single attempt, with at most one reconnect-and-retry when it
//! caches a client ([`CachedClient::run`]).

pub mod http;
pub mod kafka;
pub mod mysql;
pub mod redis;
pub mod s3;
pub mod tcp;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Capability
// ============================================================================

/// Run one health check, describe yourself.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Execute a single check. Errors are check failures, never fatal.
    async fn check(&self) -> Result<(), ProbeError>;

    /// Human-readable target description (endpoint, region, ...).
    fn metadata(&self) -> String;

    /// Upper bound the scheduler applies to one `check` call.
    fn timeout(&self) -> Duration;

    /// Release cached clients. Called once when the owning loop exits.
    async fn close(&self) {}
}

// ============================================================================
// Kinds and tasks
// ============================================================================

/// Probe protocol family, matching the config section names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeKind {
    Tcp,
    Http,
    S3,
    Mysql,
    Kafka,
    Redis,
    RedisCluster,
}

impl ProbeKind {
    pub const ALL: [Self; 7] = [
        Self::Tcp,
        Self::Http,
        Self::S3,
        Self::Mysql,
        Self::Kafka,
        Self::Redis,
        Self::RedisCluster,
    ];

    /// Config section name, also the `target_type` metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Http => "http",
            Self::S3 => "s3",
            Self::Mysql => "mysql",
            Self::Kafka => "kafka",
            Self::Redis => "redis",
            Self::RedisCluster => "redisCluster",
        }
    }

    /// Upper-case target type used in status lines, e.g. `S3_READ`.
    pub fn status_label(self, task: Task) -> String {
        let base = self.as_str().to_ascii_uppercase();
        match task {
            Task::Probe => base,
            other => format!("{base}_{}", other.as_str().to_ascii_uppercase()),
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a probe does against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Single-purpose probes (TCP, HTTP)
    Probe,
    Read,
    Write,
    /// Redis Cluster health covers both paths at once
    ReadWrite,
}

impl Task {
    /// Name used in probe keys and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }

    /// The `operation_type` metric label. Redis Cluster checks have always
    /// been counted as reads, and dashboards key on that.
    pub const fn metric_label(self) -> &'static str {
        match self {
            Self::ReadWrite => "read",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Settings rejected while building the probe; the probe is skipped.
    #[error("invalid probe settings: {0}")]
    InvalidSettings(String),

    #[error("connect to {target} failed: {message}")]
    Connect { target: String, message: String },

    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status code: {0}")]
    UnacceptableStatus(String),

    #[error("unexpected result from query: {0}")]
    UnexpectedResult(String),

    #[error("Redis cluster shard {addr} error: {message}")]
    Shard { addr: String, message: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Several independent targets failed in one check
    #[error("{kind} probe errors: {}", .errors.join("; "))]
    Aggregate {
        kind: &'static str,
        errors: Vec<String>,
    },
}

impl ProbeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    pub fn request(err: impl fmt::Display) -> Self {
        Self::Request(err.to_string())
    }
}

// ============================================================================
// Address helpers
// ============================================================================

/// Split `host:port`, falling back to `default_port` when no port is given.
///
/// Bracketed IPv6 literals (`[::1]:6379`) are supported.
pub fn split_host_port(addr: &str, default_port: Option<u16>) -> Result<(String, u16), ProbeError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ProbeError::invalid("empty address"));
    }

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ProbeError::invalid(format!("unterminated IPv6 literal in {addr:?}")))?;
        (host, tail.strip_prefix(':'))
    } else {
        match addr.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        return Err(ProbeError::invalid(format!("missing host in {addr:?}")));
    }

    let port = match (port, default_port) {
        (Some(p), _) => p
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ProbeError::invalid(format!("invalid port in {addr:?}")))?,
        (None, Some(default)) => default,
        (None, None) => return Err(ProbeError::invalid(format!("missing port in {addr:?}"))),
    };

    Ok((host.to_string(), port))
}

// ============================================================================
// Cached client with a single reconnect
// ============================================================================

/// A lazily created client shared by successive checks of one probe.
///
/// The slot is swapped atomically, so a check never holds a lock while it
/// awaits the network.
pub struct CachedClient<C> {
    slot: ArcSwapOption<C>,
}

impl<C> Default for CachedClient<C> {
    fn default() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }
}

impl<C> CachedClient<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Remove and return the cached client.
    pub fn take(&self) -> Option<Arc<C>> {
        self.slot.swap(None)
    }

    /// Run `op` against the cached client, connecting first if needed.
    ///
    /// When `op` fails the client is dropped, rebuilt once and `op` retried.
    /// If the rebuild itself fails the original error is returned.
    pub async fn run<T, Conn, ConnFut, Op, OpFut>(&self, connect: Conn, op: Op) -> Result<T, ProbeError>
    where
        Conn: Fn() -> ConnFut,
        ConnFut: Future<Output = Result<C, ProbeError>>,
        Op: Fn(Arc<C>) -> OpFut,
        OpFut: Future<Output = Result<T, ProbeError>>,
    {
        let client = match self.slot.load_full() {
            Some(client) => client,
            None => {
                let client = Arc::new(connect().await?);
                self.slot.store(Some(Arc::clone(&client)));
                client
            }
        };

        let first = match op(client).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        self.slot.store(None);
        let fresh = match connect().await {
            Ok(client) => Arc::new(client),
            Err(reconnect) => {
                tracing::debug!(error = %reconnect, "Reconnect failed, reporting original error");
                return Err(first);
            }
        };
        self.slot.store(Some(Arc::clone(&fresh)));
        op(fresh).await
    }
}
