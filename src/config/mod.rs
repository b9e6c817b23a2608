//! Prober Configuration Module
//!
//! Loads the probe fleet definition from a TOML file and keeps it fresh.
//!
//! ## Loading
//!
//! The binary reads the path given on the command line (or `$PROBER_CONFIG`,
//! default `config.toml`). A failed initial load is not fatal: the prober
//! starts with no probes and the [`watcher`] applies the first valid version.
//!
//! ## Interval inheritance
//!
//! cluster `duration` -> kind `defaultDuration` -> global `defaultDuration`
//! -> 10s, clamped to at least 100ms. See [`duration::resolve_interval`].

pub mod defaults;
pub mod duration;
mod schema;
pub mod validation;
pub mod watcher;

pub use duration::DurationString;
pub use schema::*;

/// Where this prober runs, attached to every metric sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub region: String,
    pub node_name: String,
    pub node_ip: String,
}

impl SourceIdentity {
    /// Read `SOURCE_REGION`, `NODE_NAME` and `NODE_IP`, with local defaults.
    pub fn from_env() -> Self {
        Self {
            region: env_or("SOURCE_REGION", "local"),
            node_name: env_or("NODE_NAME", "local"),
            node_ip: env_or("NODE_IP", "unknown"),
        }
    }
}

impl Default for SourceIdentity {
    fn default() -> Self {
        Self {
            region: "local".to_string(),
            node_name: "local".to_string(),
            node_ip: "unknown".to_string(),
        }
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}
