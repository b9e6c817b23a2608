//! MySQL probe, one instance per host.
//!
//! Read checks run a scalar query (default `SELECT 1`) that must return 1.
//! Write checks execute the configured statement and only care that it
//! succeeds. Each probe keeps a single-connection pool between checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use super::{split_host_port, CachedClient, Probe, ProbeError, Task};

const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlSettings {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub query: String,
    pub timeout: Duration,
    pub task: Task,
    pub region: String,
}

pub struct MySqlProbe {
    settings: MySqlSettings,
    options: MySqlConnectOptions,
    pool: CachedClient<MySqlPool>,
}

impl MySqlProbe {
    pub fn new(settings: MySqlSettings) -> Result<Self, ProbeError> {
        if settings.user.is_empty() || settings.database.is_empty() {
            return Err(ProbeError::invalid("mysql user and database are required"));
        }
        if settings.query.trim().is_empty() {
            return Err(ProbeError::invalid("mysql query is empty"));
        }
        if !matches!(settings.task, Task::Read | Task::Write) {
            return Err(ProbeError::invalid(format!(
                "mysql does not support task {}",
                settings.task
            )));
        }
        let (host, port) = split_host_port(&settings.host, Some(DEFAULT_PORT))?;

        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);

        Ok(Self {
            settings,
            options,
            pool: CachedClient::new(),
        })
    }

    fn connect(&self) -> MySqlPool {
        MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout(self.settings.timeout))
            .connect_lazy_with(self.options.clone())
    }

    async fn read(pool: Arc<MySqlPool>, query: &str) -> Result<(), ProbeError> {
        let value: i64 = sqlx::query_scalar(query)
            .fetch_one(&*pool)
            .await
            .map_err(ProbeError::request)?;
        if value != 1 {
            return Err(ProbeError::UnexpectedResult(value.to_string()));
        }
        Ok(())
    }

    async fn write(pool: Arc<MySqlPool>, query: &str) -> Result<(), ProbeError> {
        sqlx::query(query)
            .execute(&*pool)
            .await
            .map_err(ProbeError::request)?;
        Ok(())
    }
}

/// The pool retries refused connects until its acquire deadline. A check may
/// acquire twice (first try plus one reconnect), and both must give up before
/// the check timeout so the pool error is reported instead of a timeout.
fn acquire_timeout(check_timeout: Duration) -> Duration {
    check_timeout / 3
}

#[async_trait]
impl Probe for MySqlProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let query = self.settings.query.as_str();
        tracing::debug!(host = %self.settings.host, query, "Executing MySQL probe query");

        let connect = || async move { Ok::<_, ProbeError>(self.connect()) };
        match self.settings.task {
            Task::Write => self.pool.run(connect, |pool| Self::write(pool, query)).await,
            _ => self.pool.run(connect, |pool| Self::read(pool, query)).await,
        }
    }

    fn metadata(&self) -> String {
        format!(
            "Host: {} | Database: {} | User: {} | Region: {}",
            self.settings.host, self.settings.database, self.settings.user, self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }
}
