//! Duration strings and the interval inheritance chain.
//!
//! Every level of the config may carry a duration string. Empty or
//! unparseable strings never fail a load; they fall through to the next level:
//! cluster -> kind default -> global default -> [`FALLBACK_INTERVAL`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::{FALLBACK_INTERVAL, MIN_INTERVAL};

/// A human-readable duration as written in the config (`"500ms"`, `"5s"`, `"1m"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationString(pub String);

impl DurationString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parse the string, returning `None` when empty or malformed.
    pub fn parse(&self) -> Option<Duration> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return None;
        }
        humantime::parse_duration(raw).ok()
    }

    /// Parse the string or use `fallback`.
    pub fn or(&self, fallback: Duration) -> Duration {
        self.parse().unwrap_or(fallback)
    }

    /// True when a non-empty value is present but cannot be parsed.
    pub fn is_invalid(&self) -> bool {
        !self.0.trim().is_empty() && self.parse().is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DurationString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DurationString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Resolve the effective interval for a cluster and clamp it to [`MIN_INTERVAL`].
pub fn resolve_interval(
    cluster: &DurationString,
    kind_default: &DurationString,
    global_default: &DurationString,
) -> Duration {
    let resolved = cluster.or(kind_default.or(global_default.or(FALLBACK_INTERVAL)));
    clamp_interval(resolved)
}

/// Apply the scheduling floor.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}
