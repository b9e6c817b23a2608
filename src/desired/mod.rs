//! Desired probe state.
//!
//! A [`DesiredProbe`] is one schedulable unit: a unique [`ProbeKey`], the
//! effective interval, per-kind [`ProbeSettings`] and the metric labels. The
//! reconciler compares [`Fingerprint`]s of these to decide what to restart.

mod expander;

pub use expander::expand;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::probe::http::{HttpProbe, HttpSettings};
use crate::probe::kafka::{KafkaProbe, KafkaSettings};
use crate::probe::mysql::{MySqlProbe, MySqlSettings};
use crate::probe::redis::{RedisClusterProbe, RedisClusterSettings, RedisProbe, RedisSettings};
use crate::probe::s3::{S3Probe, S3Settings};
use crate::probe::tcp::{TcpProbe, TcpSettings};
use crate::probe::{Probe, ProbeError, ProbeKind, Task};

// ============================================================================
// Identity
// ============================================================================

/// Identity of one probe loop. Unique across the whole desired set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProbeKey {
    pub kind: ProbeKind,
    pub task: Task,
    pub cluster: String,
    /// Set for kinds that probe each host or node separately
    pub host: Option<String>,
}

impl ProbeKey {
    pub fn new(kind: ProbeKind, task: Task, cluster: impl Into<String>) -> Self {
        Self {
            kind,
            task,
            cluster: cluster.into(),
            host: None,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// `tcp/edge`, `s3-read/objects`, `mysql-write/orders@db-w:3306`
impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Task::Probe => write!(f, "{}/{}", self.kind, self.cluster)?,
            task => write!(f, "{}-{}/{}", self.kind, task, self.cluster)?,
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// Metric labels attached to every outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeLabels {
    pub target_type: String,
    pub operation_type: String,
    pub target_name: String,
    pub source_region: String,
    pub destination_region: String,
}

// ============================================================================
// Settings
// ============================================================================

/// Per-kind probe settings. Each variant knows how to build its probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProbeSettings {
    Tcp(TcpSettings),
    Http(HttpSettings),
    S3(S3Settings),
    Mysql(MySqlSettings),
    Kafka(KafkaSettings),
    Redis(RedisSettings),
    RedisCluster(RedisClusterSettings),
}

impl ProbeSettings {
    pub const fn kind(&self) -> ProbeKind {
        match self {
            Self::Tcp(_) => ProbeKind::Tcp,
            Self::Http(_) => ProbeKind::Http,
            Self::S3(_) => ProbeKind::S3,
            Self::Mysql(_) => ProbeKind::Mysql,
            Self::Kafka(_) => ProbeKind::Kafka,
            Self::Redis(_) => ProbeKind::Redis,
            Self::RedisCluster(_) => ProbeKind::RedisCluster,
        }
    }

    /// Construct the probe. Fails on settings the protocol cannot use.
    pub fn build(&self) -> Result<Arc<dyn Probe>, ProbeError> {
        Ok(match self {
            Self::Tcp(s) => Arc::new(TcpProbe::new(s.clone())?),
            Self::Http(s) => Arc::new(HttpProbe::new(s.clone())?),
            Self::S3(s) => Arc::new(S3Probe::new(s.clone())?),
            Self::Mysql(s) => Arc::new(MySqlProbe::new(s.clone())?),
            Self::Kafka(s) => Arc::new(KafkaProbe::new(s.clone())?),
            Self::Redis(s) => Arc::new(RedisProbe::new(s.clone())?),
            Self::RedisCluster(s) => Arc::new(RedisClusterProbe::new(s.clone())?),
        })
    }
}

// ============================================================================
// Desired probe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredProbe {
    pub key: ProbeKey,
    pub interval: Duration,
    pub settings: ProbeSettings,
    pub labels: ProbeLabels,
    /// Target description for status lines (address list, endpoint, node)
    pub host: String,
}

impl DesiredProbe {
    /// Upper-case status label, e.g. `MYSQL_READ`.
    pub fn target_type(&self) -> String {
        self.key.kind.status_label(self.key.task)
    }

    /// Digest of everything that shapes the running loop.
    pub fn fingerprint(&self) -> Fingerprint {
        #[derive(Serialize)]
        struct Canonical<'a> {
            interval: Duration,
            settings: &'a ProbeSettings,
            labels: &'a ProbeLabels,
            host: &'a str,
        }

        let canonical = Canonical {
            interval: self.interval,
            settings: &self.settings,
            labels: &self.labels,
            host: &self.host,
        };
        // Settings are plain data (strings, numbers, BTreeMaps), which always serialize
        let bytes = serde_json::to_vec(&canonical).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        Fingerprint(Sha256::digest(&bytes).into())
    }

    pub fn build_probe(&self) -> Result<Arc<dyn Probe>, ProbeError> {
        self.settings.build()
    }
}

/// SHA-256 of a probe's canonical settings. Change detection only.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// First 12 hex digits, enough for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_probe(cluster: &str, timeout_ms: u64) -> DesiredProbe {
        DesiredProbe {
            key: ProbeKey::new(ProbeKind::Tcp, Task::Probe, cluster),
            interval: Duration::from_secs(1),
            settings: ProbeSettings::Tcp(TcpSettings {
                addresses: vec!["10.0.0.1:80".into()],
                timeout: Duration::from_millis(timeout_ms),
                region: "eu".into(),
            }),
            labels: ProbeLabels {
                target_type: "tcp".into(),
                operation_type: "probe".into(),
                target_name: cluster.into(),
                source_region: "local".into(),
                destination_region: "eu".into(),
            },
            host: "10.0.0.1:80".into(),
        }
    }

    #[test]
    fn key_display() {
        assert_eq!(ProbeKey::new(ProbeKind::Tcp, Task::Probe, "edge").to_string(), "tcp/edge");
        assert_eq!(
            ProbeKey::new(ProbeKind::S3, Task::Read, "objects").to_string(),
            "s3-read/objects"
        );
        assert_eq!(
            ProbeKey::new(ProbeKind::Mysql, Task::Write, "orders")
                .with_host("db-w:3306")
                .to_string(),
            "mysql-write/orders@db-w:3306"
        );
    }

    #[test]
    fn read_and_write_keys_differ() {
        let read = ProbeKey::new(ProbeKind::S3, Task::Read, "objects");
        let write = ProbeKey::new(ProbeKind::S3, Task::Write, "objects");
        assert_ne!(read, write);
    }

    #[test]
    fn equal_settings_equal_fingerprints() {
        assert_eq!(tcp_probe("a", 2000).fingerprint(), tcp_probe("a", 2000).fingerprint());
    }

    #[test]
    fn any_field_change_moves_the_fingerprint() {
        let base = tcp_probe("a", 2000).fingerprint();
        assert_ne!(base, tcp_probe("a", 2500).fingerprint());

        let mut slower = tcp_probe("a", 2000);
        slower.interval = Duration::from_secs(2);
        assert_ne!(base, slower.fingerprint());

        let mut moved = tcp_probe("a", 2000);
        moved.labels.destination_region = "us".into();
        assert_ne!(base, moved.fingerprint());
    }

    #[test]
    fn fingerprint_renders_as_hex() {
        let fp = tcp_probe("a", 2000).fingerprint();
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short(), hex[..12]);
    }

    #[test]
    fn settings_build_matching_probe() {
        let desired = tcp_probe("a", 2000);
        assert_eq!(desired.settings.kind(), ProbeKind::Tcp);
        let probe = desired.build_probe().unwrap();
        assert_eq!(probe.timeout(), Duration::from_millis(2000));

        let mut broken = tcp_probe("a", 2000);
        broken.settings = ProbeSettings::Tcp(TcpSettings {
            addresses: vec!["missing-port".into()],
            timeout: Duration::from_secs(1),
            region: String::new(),
        });
        assert!(matches!(broken.build_probe(), Err(ProbeError::InvalidSettings(_))));
    }

    #[test]
    fn target_type_combines_kind_and_task() {
        let mut desired = tcp_probe("a", 2000);
        assert_eq!(desired.target_type(), "TCP");
        desired.key = ProbeKey::new(ProbeKind::Redis, Task::Write, "cache").with_host("r1:6379");
        assert_eq!(desired.target_type(), "REDIS_WRITE");
    }
}
