//! Success / failure counters.
//!
//! Loops only see the [`MetricsSink`] trait. The binary injects
//! [`ProberMetrics`], which owns its own Prometheus registry and adds the
//! node identity labels to every sample.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::config::SourceIdentity;
use crate::desired::ProbeLabels;

const LABELS: [&str; 7] = [
    "target_type",
    "operation_type",
    "target_name",
    "source_region",
    "destination_region",
    "source_node_name",
    "source_node_ip",
];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("metrics text is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Metrics hook called once per check outcome.
pub trait MetricsSink: Send + Sync {
    fn inc_success(&self, labels: &ProbeLabels);
    fn inc_failure(&self, labels: &ProbeLabels);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_success(&self, _labels: &ProbeLabels) {}
    fn inc_failure(&self, _labels: &ProbeLabels) {}
}

pub struct ProberMetrics {
    registry: Registry,
    success: IntCounterVec,
    failure: IntCounterVec,
    node_name: String,
    node_ip: String,
}

impl ProberMetrics {
    pub fn new(source: &SourceIdentity) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let success = IntCounterVec::new(
            Opts::new("prober_success_total", "Total number of successful probe checks"),
            &LABELS,
        )?;
        let failure = IntCounterVec::new(
            Opts::new("prober_failure_total", "Total number of failed probe checks"),
            &LABELS,
        )?;
        registry.register(Box::new(success.clone()))?;
        registry.register(Box::new(failure.clone()))?;

        Ok(Self {
            registry,
            success,
            failure,
            node_name: source.node_name.clone(),
            node_ip: source.node_ip.clone(),
        })
    }

    /// Prometheus text exposition of every registered counter.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn success_count(&self, labels: &ProbeLabels) -> u64 {
        self.success.with_label_values(&self.values(labels)).get()
    }

    pub fn failure_count(&self, labels: &ProbeLabels) -> u64 {
        self.failure.with_label_values(&self.values(labels)).get()
    }

    fn values<'a>(&'a self, labels: &'a ProbeLabels) -> [&'a str; 7] {
        [
            &labels.target_type,
            &labels.operation_type,
            &labels.target_name,
            &labels.source_region,
            &labels.destination_region,
            &self.node_name,
            &self.node_ip,
        ]
    }
}

impl MetricsSink for ProberMetrics {
    fn inc_success(&self, labels: &ProbeLabels) {
        self.success.with_label_values(&self.values(labels)).inc();
    }

    fn inc_failure(&self, labels: &ProbeLabels) {
        self.failure.with_label_values(&self.values(labels)).inc();
    }
}
