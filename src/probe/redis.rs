//! Redis probes.
//!
//! [`RedisProbe`] checks a single node: `PING` for reads, a short-lived
//! `SET` for writes, over a cached multiplexed connection.
//! [`RedisClusterProbe`] checks every seed node of a Redis Cluster and
//! reports the first unhealthy shard.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

use super::{split_host_port, CachedClient, Probe, ProbeError, Task};
use crate::config::defaults::REDIS_WRITE_TTL_SECS;

const DEFAULT_PORT: u16 = 6379;

fn connection_info(node: &str, password: &str) -> Result<ConnectionInfo, ProbeError> {
    let (host, port) = split_host_port(node, Some(DEFAULT_PORT))?;
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            password: (!password.is_empty()).then(|| password.to_string()),
            ..Default::default()
        },
    })
}

async fn open(info: &ConnectionInfo) -> Result<MultiplexedConnection, ProbeError> {
    let client = redis::Client::open(info.clone()).map_err(|e| ProbeError::Connect {
        target: info.addr.to_string(),
        message: e.to_string(),
    })?;
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| ProbeError::Connect {
            target: info.addr.to_string(),
            message: e.to_string(),
        })
}

fn probe_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("probe_key_{suffix}")
}

// ============================================================================
// Single node
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisSettings {
    pub node: String,
    pub password: String,
    pub timeout: Duration,
    pub task: Task,
    pub region: String,
}

pub struct RedisProbe {
    settings: RedisSettings,
    info: ConnectionInfo,
    conn: CachedClient<MultiplexedConnection>,
}

impl RedisProbe {
    pub fn new(settings: RedisSettings) -> Result<Self, ProbeError> {
        if !matches!(settings.task, Task::Read | Task::Write) {
            return Err(ProbeError::invalid(format!(
                "redis does not support task {}",
                settings.task
            )));
        }
        let info = connection_info(&settings.node, &settings.password)?;
        Ok(Self {
            settings,
            info,
            conn: CachedClient::new(),
        })
    }

    async fn ping(conn: Arc<MultiplexedConnection>) -> Result<(), ProbeError> {
        let mut conn = (*conn).clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(ProbeError::request)?;
        Ok(())
    }

    async fn set(conn: Arc<MultiplexedConnection>, key: String) -> Result<(), ProbeError> {
        let mut conn = (*conn).clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg("ok")
            .arg("EX")
            .arg(REDIS_WRITE_TTL_SECS)
            .query_async(&mut conn)
            .await
            .map_err(ProbeError::request)?;
        Ok(())
    }
}

#[async_trait]
impl Probe for RedisProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let info = &self.info;
        let connect = || open(info);

        match self.settings.task {
            Task::Write => {
                let key = probe_key();
                tracing::debug!(node = %self.settings.node, key = %key, "Writing Redis probe key");
                self.conn.run(connect, |conn| Self::set(conn, key.clone())).await
            }
            _ => self.conn.run(connect, Self::ping).await,
        }
    }

    fn metadata(&self) -> String {
        format!("Node: {} , Region: {}", self.settings.node, self.settings.region)
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    async fn close(&self) {
        self.conn.take();
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisClusterSettings {
    pub nodes: Vec<String>,
    pub password: String,
    pub timeout: Duration,
    pub region: String,
}

pub struct RedisClusterProbe {
    settings: RedisClusterSettings,
    shards: Vec<ConnectionInfo>,
}

impl RedisClusterProbe {
    pub fn new(settings: RedisClusterSettings) -> Result<Self, ProbeError> {
        if settings.nodes.is_empty() {
            return Err(ProbeError::invalid("redis cluster needs at least one node"));
        }
        let shards = settings
            .nodes
            .iter()
            .map(|node| connection_info(node, &settings.password))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { settings, shards })
    }

    async fn check_shard(info: &ConnectionInfo) -> Result<(), String> {
        let mut conn = open(info).await.map_err(|e| e.to_string())?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;

        let cluster_info: String = redis::cmd("CLUSTER")
            .arg("INFO")
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        if !cluster_info.contains("cluster_state:ok") {
            return Err("cluster_state is not ok".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Probe for RedisClusterProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        for (node, info) in self.settings.nodes.iter().zip(&self.shards) {
            if let Err(message) = Self::check_shard(info).await {
                return Err(ProbeError::Shard {
                    addr: node.clone(),
                    message,
                });
            }
        }
        Ok(())
    }

    fn metadata(&self) -> String {
        format!(
            "Nodes: [{}] | Region: {}",
            self.settings.nodes.join(", "),
            self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_settings(node: &str, task: Task) -> RedisSettings {
        RedisSettings {
            node: node.to_string(),
            password: String::new(),
            timeout: Duration::from_secs(1),
            task,
            region: "ap-south".into(),
        }
    }

    async fn closed_port() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn probe_keys_are_random_and_prefixed() {
        let a = probe_key();
        let b = probe_key();
        assert!(a.starts_with("probe_key_"));
        assert_eq!(a.len(), "probe_key_".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn connection_info_carries_password() {
        let info = connection_info("cache:7000", "pw").unwrap();
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 7000) if host == "cache"));
        assert_eq!(info.redis.password.as_deref(), Some("pw"));

        let info = connection_info("cache", "").unwrap();
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 6379) if host == "cache"));
        assert!(info.redis.password.is_none());
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(RedisProbe::new(node_settings("cache:x", Task::Read)).is_err());
        assert!(RedisProbe::new(node_settings("cache:6379", Task::Probe)).is_err());
        assert!(RedisClusterProbe::new(RedisClusterSettings {
            nodes: vec![],
            password: String::new(),
            timeout: Duration::from_secs(1),
            region: String::new(),
        })
        .is_err());
    }

    #[test]
    fn metadata_formats() {
        let probe = RedisProbe::new(node_settings("cache:6379", Task::Read)).unwrap();
        assert_eq!(probe.metadata(), "Node: cache:6379 , Region: ap-south");

        let cluster = RedisClusterProbe::new(RedisClusterSettings {
            nodes: vec!["r1:7000".into(), "r2:7000".into()],
            password: String::new(),
            timeout: Duration::from_secs(1),
            region: "ap-south".into(),
        })
        .unwrap();
        assert_eq!(cluster.metadata(), "Nodes: [r1:7000, r2:7000] | Region: ap-south");
    }

    #[tokio::test]
    async fn unreachable_node_fails() {
        let addr = closed_port().await;
        let probe = RedisProbe::new(node_settings(&addr, Task::Write)).unwrap();
        assert!(matches!(probe.check().await, Err(ProbeError::Connect { .. })));
        assert!(!probe.conn.is_connected());
    }

    #[tokio::test]
    async fn unreachable_shard_is_reported_by_address() {
        let addr = closed_port().await;
        let probe = RedisClusterProbe::new(RedisClusterSettings {
            nodes: vec![addr.clone()],
            password: String::new(),
            timeout: Duration::from_secs(1),
            region: String::new(),
        })
        .unwrap();

        let err = probe.check().await.unwrap_err();
        assert!(matches!(err, ProbeError::Shard { .. }));
        assert!(
            err.to_string().starts_with(&format!("Redis cluster shard {addr} error:")),
            "{err}"
        );
    }
}
