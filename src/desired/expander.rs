//! Desired-state expander: config tree -> flat list of [`DesiredProbe`]s.
//!
//! One probe per cluster for TCP, HTTP, Kafka tasks, S3 tasks and Redis
//! Cluster; one per host for MySQL and per node for Redis. Tasks are opt-in
//! for every kind that has them. Intervals follow the inheritance chain in
//! [`crate::config::duration`].

use std::collections::HashSet;
use std::time::Duration;

use tracing::warn;

use super::{DesiredProbe, ProbeKey, ProbeLabels, ProbeSettings};
use crate::config::defaults::{
    CHECK_TIMEOUT, HTTP_TIMEOUT, MYSQL_DEFAULT_QUERY, S3_OBJECT_KEY, TCP_TIMEOUT,
};
use crate::config::duration::resolve_interval;
use crate::config::{ProberConfig, SourceIdentity, Tasks};
use crate::probe::http::HttpSettings;
use crate::probe::kafka::KafkaSettings;
use crate::probe::mysql::MySqlSettings;
use crate::probe::redis::{RedisClusterSettings, RedisSettings};
use crate::probe::s3::S3Settings;
use crate::probe::tcp::TcpSettings;
use crate::probe::{ProbeKind, Task};

/// Expand the whole config into the complete desired probe set.
///
/// The result holds no duplicate keys: if two clusters of a kind share a
/// name, the first wins and the rest are dropped with a warning.
pub fn expand(config: &ProberConfig, source: &SourceIdentity) -> Vec<DesiredProbe> {
    let mut out = Expansion::new(source);
    let global = &config.default_duration;

    for c in &config.tcp.clusters {
        let mut scope = out.cluster(ProbeKind::Tcp, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.tcp.default_duration, global);
        scope.push(
            Task::Probe,
            None,
            c.addresses.join(","),
            ProbeSettings::Tcp(TcpSettings {
                addresses: c.addresses.clone(),
                timeout: c.timeout.or(TCP_TIMEOUT),
                region: c.region.clone(),
            }),
        );
    }

    for c in &config.http.clusters {
        let mut scope = out.cluster(ProbeKind::Http, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.http.default_duration, global);
        scope.push(
            Task::Probe,
            None,
            c.endpoint.clone(),
            ProbeSettings::Http(HttpSettings {
                endpoint: c.endpoint.clone(),
                method: c.method.clone(),
                body: c.body.clone(),
                proxy_url: c.proxy_url.clone(),
                headers: c.headers.clone(),
                unacceptable_status_codes: c.unacceptable_status_codes.clone(),
                timeout: c.timeout.or(HTTP_TIMEOUT),
                skip_tls_verify: c.skip_tls_verify,
                region: c.region.clone(),
            }),
        );
    }

    for c in &config.s3.clusters {
        let mut scope = out.cluster(ProbeKind::S3, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.s3.default_duration, global);
        for task in requested(c.tasks) {
            scope.push(
                task,
                None,
                c.endpoint.clone(),
                ProbeSettings::S3(S3Settings {
                    endpoint: c.endpoint.clone(),
                    region: c.region.clone(),
                    access_key: c.access_key.clone(),
                    secret_key: c.secret_key.clone(),
                    bucket: c.bucket.clone(),
                    object_key: S3_OBJECT_KEY.to_string(),
                    use_ssl: c.use_ssl,
                    timeout: c.timeout.or(CHECK_TIMEOUT),
                    task,
                }),
            );
        }
    }

    for c in &config.mysql.clusters {
        let mut scope = out.cluster(ProbeKind::Mysql, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.mysql.default_duration, global);
        for task in requested(c.tasks) {
            let (hosts, query) = match task {
                Task::Write => (&c.write_hosts, &c.write_query),
                _ => (&c.read_hosts, &c.read_query),
            };
            let query = if query.trim().is_empty() {
                MYSQL_DEFAULT_QUERY.to_string()
            } else {
                query.clone()
            };
            for host in hosts {
                scope.push(
                    task,
                    Some(host),
                    host.clone(),
                    ProbeSettings::Mysql(MySqlSettings {
                        host: host.clone(),
                        user: c.user.clone(),
                        password: c.password.clone(),
                        database: c.database.clone(),
                        query: query.clone(),
                        timeout: c.timeout.or(CHECK_TIMEOUT),
                        task,
                        region: c.region.clone(),
                    }),
                );
            }
        }
    }

    for c in &config.kafka.clusters {
        let mut scope = out.cluster(ProbeKind::Kafka, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.kafka.default_duration, global);
        for task in requested(c.tasks) {
            scope.push(
                task,
                None,
                c.brokers.join(","),
                ProbeSettings::Kafka(KafkaSettings {
                    brokers: c.brokers.clone(),
                    topic: c.topic.clone(),
                    timeout: c.timeout.or(CHECK_TIMEOUT),
                    task,
                    region: c.region.clone(),
                }),
            );
        }
    }

    for c in &config.redis.clusters {
        let mut scope = out.cluster(ProbeKind::Redis, &c.name, &c.region);
        scope.interval = resolve_interval(&c.duration, &config.redis.default_duration, global);
        for task in requested(c.tasks) {
            for node in &c.nodes {
                scope.push(
                    task,
                    Some(node),
                    node.clone(),
                    ProbeSettings::Redis(RedisSettings {
                        node: node.clone(),
                        password: c.password.clone(),
                        timeout: c.timeout.or(CHECK_TIMEOUT),
                        task,
                        region: c.region.clone(),
                    }),
                );
            }
        }
    }

    for c in &config.redis_cluster.clusters {
        if !c.tasks.any() {
            continue;
        }
        let mut scope = out.cluster(ProbeKind::RedisCluster, &c.name, &c.region);
        scope.interval =
            resolve_interval(&c.duration, &config.redis_cluster.default_duration, global);
        scope.push(
            Task::ReadWrite,
            None,
            c.nodes.join(","),
            ProbeSettings::RedisCluster(RedisClusterSettings {
                nodes: c.nodes.clone(),
                password: c.password.clone(),
                timeout: c.timeout.or(CHECK_TIMEOUT),
                region: c.region.clone(),
            }),
        );
    }

    out.probes
}

/// Tasks a cluster opted into, read before write.
fn requested(tasks: Tasks) -> impl Iterator<Item = Task> {
    [(tasks.read, Task::Read), (tasks.write, Task::Write)]
        .into_iter()
        .filter_map(|(on, task)| on.then_some(task))
}

struct Expansion<'a> {
    source: &'a SourceIdentity,
    seen: HashSet<ProbeKey>,
    probes: Vec<DesiredProbe>,
}

impl<'a> Expansion<'a> {
    fn new(source: &'a SourceIdentity) -> Self {
        Self {
            source,
            seen: HashSet::new(),
            probes: Vec::new(),
        }
    }

    fn cluster<'s>(
        &'s mut self,
        kind: ProbeKind,
        name: &'s str,
        region: &'s str,
    ) -> ClusterScope<'s, 'a> {
        // Missing regions are reported once by the load-time validation pass
        ClusterScope {
            expansion: self,
            kind,
            name,
            region,
            interval: Duration::ZERO,
        }
    }
}

/// Shared fields of every probe one cluster expands into.
struct ClusterScope<'s, 'a> {
    expansion: &'s mut Expansion<'a>,
    kind: ProbeKind,
    name: &'s str,
    region: &'s str,
    interval: Duration,
}

impl ClusterScope<'_, '_> {
    fn push(&mut self, task: Task, host: Option<&String>, target: String, settings: ProbeSettings) {
        let mut key = ProbeKey::new(self.kind, task, self.name);
        if let Some(host) = host {
            key = key.with_host(host.clone());
        }

        if !self.expansion.seen.insert(key.clone()) {
            warn!(key = %key, "Duplicate probe key in config, keeping the first definition");
            return;
        }

        let labels = ProbeLabels {
            target_type: self.kind.as_str().to_string(),
            operation_type: task.metric_label().to_string(),
            target_name: self.name.to_string(),
            source_region: self.expansion.source.region.clone(),
            destination_region: self.region.to_string(),
        };

        self.expansion.probes.push(DesiredProbe {
            key,
            interval: self.interval,
            settings,
            labels,
            host: target,
        });
    }
}
