//! Config validation: unknown-key detection with Levenshtein suggestions
//! and semantic sanity checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree (including every `[[<kind>.clusters]]` entry), compare
//! against known field names, and emit warnings with "did you mean?"
//! suggestions. Serde deserialization ignores unknown keys, so warnings never
//! break existing configs.

use std::collections::HashSet;

use super::duration::DurationString;
use super::schema::ProberConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

const KINDS: &[&str] = &["tcp", "http", "s3", "mysql", "kafka", "redis", "redisCluster"];

const COMMON_CLUSTER_FIELDS: &[&str] = &["name", "region", "duration", "timeout"];

const TASK_FIELDS: &[&str] = &["tasks", "tasks.read", "tasks.write"];

fn kind_fields(kind: &str) -> &'static [&'static str] {
    match kind {
        "tcp" => &["addresses"],
        "http" => &[
            "endpoint",
            "method",
            "body",
            "headers",
            "proxy_url",
            "unacceptable_status_codes",
            "skip_tls_verify",
        ],
        "s3" => &["endpoint", "accessKey", "secretKey", "bucket", "useSSL"],
        "mysql" => &[
            "read_hosts",
            "write_hosts",
            "user",
            "password",
            "database",
            "read_query",
            "write_query",
        ],
        "kafka" => &["brokers", "topic"],
        "redis" | "redisCluster" => &["nodes", "password"],
        _ => &[],
    }
}

/// Kinds that schedule one probe per host, so same-named clusters only
/// collide on hosts they share.
fn keyed_per_host(kind: &str) -> bool {
    matches!(kind, "mysql" | "redis")
}

fn has_tasks(kind: &str) -> bool {
    !matches!(kind, "tcp" | "http")
}

/// Returns the complete set of valid dotted key paths for `ProberConfig`.
///
/// Cluster fields appear as `<kind>.clusters.<field>` regardless of the
/// array index. This is maintained manually to match `schema.rs`.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys = HashSet::new();
    keys.insert("defaultDuration".to_string());
    for kind in KINDS {
        keys.insert((*kind).to_string());
        keys.insert(format!("{kind}.defaultDuration"));
        keys.insert(format!("{kind}.clusters"));
        let tasks: &[&str] = if has_tasks(kind) { TASK_FIELDS } else { &[] };
        for field in COMMON_CLUSTER_FIELDS
            .iter()
            .chain(kind_fields(kind))
            .chain(tasks)
        {
            keys.insert(format!("{kind}.clusters.{field}"));
        }
    }
    keys
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// Arrays of tables contribute their members' keys under the array's path,
/// so `{ a = [{ b = 1 }] }` yields `["a", "a.b"]`. Free-form maps (HTTP
/// headers) are not descended into.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if k == "headers" {
                continue;
            }
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        keys.extend(walk_toml_keys(item, &path));
                    }
                }
                _ => {}
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Semantic Validation
// ============================================================================

/// Identity and settings every cluster kind shares, for kind-agnostic checks.
struct ClusterView<'a> {
    kind: &'static str,
    name: &'a str,
    region: &'a str,
    duration: &'a DurationString,
    timeout: &'a DurationString,
    requests_tasks: bool,
    targets: usize,
}

fn cluster_views(config: &ProberConfig) -> Vec<ClusterView<'_>> {
    let mut views = Vec::new();
    for c in &config.tcp.clusters {
        views.push(ClusterView {
            kind: "tcp",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: true,
            targets: c.addresses.len(),
        });
    }
    for c in &config.http.clusters {
        views.push(ClusterView {
            kind: "http",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: true,
            targets: usize::from(!c.endpoint.is_empty()),
        });
    }
    for c in &config.s3.clusters {
        views.push(ClusterView {
            kind: "s3",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: c.tasks.any(),
            targets: usize::from(!c.endpoint.is_empty()),
        });
    }
    for c in &config.mysql.clusters {
        views.push(ClusterView {
            kind: "mysql",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: c.tasks.any(),
            targets: c.read_hosts.len() + c.write_hosts.len(),
        });
    }
    for c in &config.kafka.clusters {
        views.push(ClusterView {
            kind: "kafka",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: c.tasks.any(),
            targets: c.brokers.len(),
        });
    }
    for c in &config.redis.clusters {
        views.push(ClusterView {
            kind: "redis",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: c.tasks.any(),
            targets: c.nodes.len(),
        });
    }
    for c in &config.redis_cluster.clusters {
        views.push(ClusterView {
            kind: "redisCluster",
            name: &c.name,
            region: &c.region,
            duration: &c.duration,
            timeout: &c.timeout,
            requests_tasks: c.tasks.any(),
            targets: c.nodes.len(),
        });
    }
    views
}

/// Check a parsed config for suspicious but non-fatal content.
///
/// Flags unparseable durations (they fall back to the next level), clusters
/// without a region, clusters that request no tasks or have no targets, and
/// duplicate cluster names within a kind.
pub fn validate_semantics(config: &ProberConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut durations = vec![("defaultDuration".to_string(), &config.default_duration)];
    durations.push(("tcp.defaultDuration".into(), &config.tcp.default_duration));
    durations.push(("http.defaultDuration".into(), &config.http.default_duration));
    durations.push(("s3.defaultDuration".into(), &config.s3.default_duration));
    durations.push(("mysql.defaultDuration".into(), &config.mysql.default_duration));
    durations.push(("kafka.defaultDuration".into(), &config.kafka.default_duration));
    durations.push(("redis.defaultDuration".into(), &config.redis.default_duration));
    durations.push((
        "redisCluster.defaultDuration".into(),
        &config.redis_cluster.default_duration,
    ));

    let views = cluster_views(config);
    for v in &views {
        durations.push((format!("{}.clusters[{}].duration", v.kind, v.name), v.duration));
        durations.push((format!("{}.clusters[{}].timeout", v.kind, v.name), v.timeout));
    }

    for (field, value) in durations {
        if value.is_invalid() {
            warnings.push(ValidationWarning {
                message: format!("{field} = '{value}' is not a valid duration, using the inherited default"),
                field,
                suggestion: None,
            });
        }
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for v in &views {
        let field = format!("{}.clusters[{}]", v.kind, v.name);
        if !seen.insert((v.kind, v.name)) {
            let message = if keyed_per_host(v.kind) {
                format!(
                    "{field} is defined more than once, hosts not already listed are probed \
                     under the same metric labels"
                )
            } else {
                format!("{field} is defined more than once, only the first definition is probed")
            };
            warnings.push(ValidationWarning {
                field: field.clone(),
                message,
                suggestion: None,
            });
        }
        if v.region.is_empty() {
            warnings.push(ValidationWarning {
                field: field.clone(),
                message: format!("{field} has no region, metrics will carry an empty destination region"),
                suggestion: None,
            });
        }
        if !v.requests_tasks {
            warnings.push(ValidationWarning {
                field: field.clone(),
                message: format!("{field} requests no tasks and will not be probed"),
                suggestion: None,
            });
        } else if v.targets == 0 {
            warnings.push(ValidationWarning {
                field: field.clone(),
                message: format!("{field} lists no targets"),
                suggestion: None,
            });
        }
    }

    warnings
}
