//! Prober Configuration - one canonical schema type per probe kind
//!
//! These structs are the single source of truth for what a cluster looks like.
//! They are deserialized from TOML, validated, and then handed to the
//! desired-state expander, which projects them into per-probe settings.
//!
//! Unknown keys are ignored by serde (the validation pass warns about them),
//! and every optional field falls back to its default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::duration::DurationString;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration document.
///
/// ```toml
/// defaultDuration = "10s"
///
/// [tcp]
/// defaultDuration = "5s"
///
/// [[tcp.clusters]]
/// name = "edge-lb"
/// addresses = ["10.0.0.1:443", "10.0.0.2:443"]
/// region = "eu-west"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProberConfig {
    /// Global interval applied beneath every kind-level default
    #[serde(default, rename = "defaultDuration")]
    pub default_duration: DurationString,

    #[serde(default)]
    pub tcp: KindSection<TcpCluster>,

    #[serde(default)]
    pub http: KindSection<HttpCluster>,

    #[serde(default)]
    pub s3: KindSection<S3Cluster>,

    #[serde(default)]
    pub mysql: KindSection<MySqlCluster>,

    #[serde(default)]
    pub kafka: KindSection<KafkaCluster>,

    #[serde(default)]
    pub redis: KindSection<RedisCluster>,

    #[serde(default, rename = "redisCluster")]
    pub redis_cluster: KindSection<RedisClusterTarget>,
}

impl ProberConfig {
    /// Load and validate a config file.
    ///
    /// Validation problems are logged as warnings and never fail the load;
    /// only I/O and TOML syntax/type errors do.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file_bytes(path, &bytes)
    }

    /// Parse and validate contents already read from `path`.
    ///
    /// `path` only labels errors and log lines.
    pub fn from_file_bytes(path: &Path, bytes: &[u8]) -> Result<Self, ConfigError> {
        let contents = std::str::from_utf8(bytes).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        let config = Self::from_toml_str(contents)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        for w in super::validation::validate_unknown_keys(contents) {
            warn!(path = %path.display(), "{}", w);
        }
        for w in super::validation::validate_semantics(&config) {
            warn!(path = %path.display(), "{}", w);
        }

        info!(
            path = %path.display(),
            clusters = config.cluster_count(),
            "Loaded prober config"
        );
        Ok(config)
    }

    /// Parse a TOML document without touching the filesystem.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Total number of cluster definitions across every kind.
    pub fn cluster_count(&self) -> usize {
        self.tcp.clusters.len()
            + self.http.clusters.len()
            + self.s3.clusters.len()
            + self.mysql.clusters.len()
            + self.kafka.clusters.len()
            + self.redis.clusters.len()
            + self.redis_cluster.clusters.len()
    }
}

/// Per-kind section: a kind-wide default interval and the cluster list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSection<C> {
    #[serde(default, rename = "defaultDuration")]
    pub default_duration: DurationString,

    #[serde(default = "Vec::new")]
    pub clusters: Vec<C>,
}

impl<C> Default for KindSection<C> {
    fn default() -> Self {
        Self {
            default_duration: DurationString::default(),
            clusters: Vec::new(),
        }
    }
}

/// Opt-in task flags. A cluster with neither flag set produces no probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tasks {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

impl Tasks {
    pub fn any(&self) -> bool {
        self.read || self.write
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Plain TCP reachability of one or more addresses, checked together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpCluster {
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpCluster {
    pub name: String,
    pub endpoint: String,
    /// HTTP method, GET when empty
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: String,
    /// Ordered so identical header sets always serialize identically
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub proxy_url: String,
    /// Status codes that count as a failed check; everything else passes
    #[serde(default)]
    pub unacceptable_status_codes: Vec<u16>,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
}

// ============================================================================
// S3
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Cluster {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, rename = "accessKey")]
    pub access_key: String,
    #[serde(default, rename = "secretKey")]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
    #[serde(default)]
    pub tasks: Tasks,
}

// ============================================================================
// MySQL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MySqlCluster {
    pub name: String,
    #[serde(default)]
    pub read_hosts: Vec<String>,
    #[serde(default)]
    pub write_hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub read_query: String,
    #[serde(default)]
    pub write_query: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
    #[serde(default)]
    pub tasks: Tasks,
}

// ============================================================================
// Kafka
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KafkaCluster {
    pub name: String,
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
    #[serde(default)]
    pub tasks: Tasks,
}

// ============================================================================
// Redis
// ============================================================================

/// Standalone Redis nodes, probed one by one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisCluster {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
    #[serde(default)]
    pub tasks: Tasks,
}

/// A Redis Cluster deployment, probed as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedisClusterTarget {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub duration: DurationString,
    #[serde(default)]
    pub timeout: DurationString,
    #[serde(default)]
    pub tasks: Tasks,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
defaultDuration = "10s"

[tcp]
defaultDuration = "5s"

[[tcp.clusters]]
name = "edge"
addresses = ["127.0.0.1:80"]
region = "eu-west"

[[s3.clusters]]
name = "objects"
endpoint = "minio:9000"
accessKey = "AK"
secretKey = "SK"
bucket = "health"
useSSL = true
tasks = { read = true, write = true }

[[mysql.clusters]]
name = "orders"
read_hosts = ["db-r1:3306", "db-r2:3306"]
write_hosts = ["db-w:3306"]
user = "probe"
database = "orders"
tasks = { read = true }

[[redisCluster.clusters]]
name = "sessions"
nodes = ["r1:7000", "r2:7000"]
tasks = { read = true }
"#;

    #[test]
    fn parses_sample_document() {
        let config = ProberConfig::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(config.default_duration, DurationString::from("10s"));
        assert_eq!(config.tcp.default_duration, DurationString::from("5s"));
        assert_eq!(config.tcp.clusters[0].addresses, vec!["127.0.0.1:80"]);
        assert!(config.s3.clusters[0].use_ssl);
        assert_eq!(config.s3.clusters[0].access_key, "AK");
        assert_eq!(config.mysql.clusters[0].read_hosts.len(), 2);
        assert!(config.mysql.clusters[0].tasks.read);
        assert!(!config.mysql.clusters[0].tasks.write);
        assert_eq!(config.redis_cluster.clusters[0].nodes.len(), 2);
        assert_eq!(config.cluster_count(), 4);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = r#"
colour = "blue"

[[http.clusters]]
name = "api"
endpoint = "http://localhost/health"
retries = 3
"#;
        let config = ProberConfig::from_toml_str(doc).expect("extra fields must not fail");
        assert_eq!(config.http.clusters[0].name, "api");
        assert!(config.http.clusters[0].method.is_empty());
    }

    #[test]
    fn empty_document_is_an_empty_config() {
        let config = ProberConfig::from_toml_str("").expect("empty doc parses");
        assert_eq!(config, ProberConfig::default());
        assert_eq!(config.cluster_count(), 0);
    }

    #[test]
    fn wrong_types_are_parse_errors() {
        let doc = r#"
[[tcp.clusters]]
name = "x"
addresses = "not-a-list"
"#;
        assert!(ProberConfig::from_toml_str(doc).is_err());
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = ProberConfig::load_from_file(Path::new("/definitely/not/here.toml"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
