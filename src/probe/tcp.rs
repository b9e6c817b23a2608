//! TCP reachability probe.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use super::{split_host_port, Probe, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub addresses: Vec<String>,
    pub timeout: Duration,
    pub region: String,
}

/// Connects to every configured address; any failure fails the check.
pub struct TcpProbe {
    settings: TcpSettings,
}

impl TcpProbe {
    pub fn new(settings: TcpSettings) -> Result<Self, ProbeError> {
        if settings.addresses.is_empty() {
            return Err(ProbeError::invalid("tcp probe needs at least one address"));
        }
        for addr in &settings.addresses {
            split_host_port(addr, None)?;
        }
        Ok(Self { settings })
    }

    async fn dial(addr: &str, timeout: Duration) -> Result<(), String> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("{addr}: dial error: {e}")),
            Err(_) => Err(format!("{addr}: dial timeout after {timeout:?}")),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let dials = self
            .settings
            .addresses
            .iter()
            .map(|addr| Self::dial(addr, self.settings.timeout));

        let errors: Vec<String> = futures::future::join_all(dials)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::Aggregate { kind: "tcp", errors })
        }
    }

    fn metadata(&self) -> String {
        format!(
            "addresses: [{}] | region: {}",
            self.settings.addresses.join(", "),
            self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }
}
