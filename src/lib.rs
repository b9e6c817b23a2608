//! Fleet Prober: continuous health probing of infrastructure targets
//!
//! Reads a fleet of TCP, HTTP, S3, MySQL, Kafka, Redis and Redis Cluster
//! targets from a hot-reloadable TOML file and keeps one probe loop running
//! per target.
//!
//! ## Architecture
//!
//! - **Expander** ([`desired::expand`]): config tree -> flat list of keyed probes
//! - **Reconciler** ([`manager::ProbeManager`]): start / restart / stop loops by fingerprint
//! - **Scheduler** ([`scheduler::ProbeLoop`]): one check per tick, bounded by a timeout
//! - **Status Sink** ([`status::StatusSink`]): one log line per check outcome
//! - **Metrics** ([`metrics::ProberMetrics`]): Prometheus success / failure counters

pub mod api;
pub mod config;
pub mod desired;
pub mod manager;
pub mod metrics;
pub mod probe;
pub mod scheduler;
pub mod status;

pub use config::{ProberConfig, SourceIdentity};
pub use desired::{expand, DesiredProbe, Fingerprint, ProbeKey};
pub use manager::{ManagerError, ProbeManager, ReconcileReport};
pub use metrics::{MetricsSink, NoopMetrics, ProberMetrics};
pub use probe::{Probe, ProbeError, ProbeKind, Task};
pub use status::{Outcome, StatusEvent, StatusSink};
