//! System-wide default constants.
//!
//! Centralises the magic numbers of the prober. Grouped by subsystem for easy
//! discovery.

use std::time::Duration;

// ============================================================================
// Scheduling
// ============================================================================

/// Interval used when neither the cluster, the kind section nor the global
/// section carries a usable duration.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(10);

/// Lower bound on any effective probe interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of overlapping checks a single probe loop may have in flight.
pub const MAX_IN_FLIGHT_CHECKS: usize = 16;

/// Upper bound on `Probe::close` when a loop exits.
pub const PROBE_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Check Timeouts
// ============================================================================

/// TCP dial timeout when the cluster sets none.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP request timeout when the cluster sets none.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for S3, MySQL, Kafka and Redis checks when the cluster sets none.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Status Pipeline
// ============================================================================

/// Capacity of the shared status channel between probe loops and the sink.
pub const STATUS_CHANNEL_CAPACITY: usize = 1_024;

// ============================================================================
// Hot Reload
// ============================================================================

/// Interval between config file checks.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Settle time after a change is seen (editors often write in stages).
pub const CONFIG_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// How often a persisting config error is logged again.
pub const CONFIG_ERROR_REANNOUNCE: Duration = Duration::from_secs(30);

// ============================================================================
// Process
// ============================================================================

/// Default bind address of the Prometheus endpoint.
pub const METRICS_ADDR: &str = "127.0.0.1:2112";

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// How long shutdown waits for probe loops to exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Probe Payloads
// ============================================================================

/// Object key written and read back by the S3 probes.
pub const S3_OBJECT_KEY: &str = "probe-test-file";

/// Size of the random payload written by the S3 write probe.
pub const S3_PAYLOAD_BYTES: usize = 100;

/// Query used by MySQL probes without an explicit query.
pub const MYSQL_DEFAULT_QUERY: &str = "SELECT 1";

/// Expiry of keys written by the Redis write probe.
pub const REDIS_WRITE_TTL_SECS: u64 = 30;

/// Client id sent in Kafka request headers.
pub const KAFKA_CLIENT_ID: &str = "fleet-prober";
