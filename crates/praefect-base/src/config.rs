use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Config is the full set of enumerated options from spec.md §6,
/// loaded once at startup from a TOML file (see `praefect::config`
/// for the loader, which layers environment variable overrides on
/// top of this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub virtual_storages: Vec<VirtualStorage>,
    #[serde(default)]
    pub failover: Failover,
    #[serde(default)]
    pub replication: ReplicationTuning,
    #[serde(default)]
    pub transaction: TransactionTuning,
    pub listen: Listen,
    /// Bearer token every client RPC is checked against (spec.md §6).
    pub auth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualStorage {
    pub name: String,
    pub nodes: Vec<PhysicalNode>,
    /// Only meaningful under `ElectionStrategy::Sql`: the statically
    /// configured primary storage name.
    #[serde(default)]
    pub primary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub storage: String,
    pub address: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failover {
    pub election_strategy: ElectionStrategy,
}

impl Default for Failover {
    fn default() -> Self {
        Failover { election_strategy: ElectionStrategy::Sql }
    }
}

/// ElectionStrategy selects how the router (spec.md §4.F) picks a
/// mutator's primary. `PerRepository` and `Local` are supplemental
/// strategies recovered from `original_source/` (see SPEC_FULL.md);
/// `Sql` is the spec.md default (a statically configured primary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStrategy {
    Sql,
    PerRepository,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTuning {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: std::time::Duration,
    #[serde(with = "humantime_serde", default = "default_stale_threshold")]
    pub stale_threshold: std::time::Duration,
}

fn default_batch_size() -> u32 {
    10
}
fn default_poll_interval() -> std::time::Duration {
    std::time::Duration::from_secs(1)
}
fn default_heartbeat_interval() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}
fn default_stale_threshold() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

impl Default for ReplicationTuning {
    fn default() -> Self {
        ReplicationTuning {
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            stale_threshold: default_stale_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTuning {
    /// Ratio in (0.5, 1.0] used as the default quorum threshold when a
    /// mutator doesn't specify one explicitly (spec.md §6, §4.E).
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for TransactionTuning {
    fn default() -> Self {
        TransactionTuning { default_threshold: default_threshold() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listen {
    pub tcp: Option<String>,
    pub tls: Option<TlsListen>,
    pub unix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsListen {
    pub address: String,
    pub cert_path: String,
    pub key_path: String,
}

impl Config {
    /// Validates the fields that the router, transaction manager and
    /// queue all assume hold: non-empty virtual storages, unique
    /// storage names, a sane threshold ratio, and at least one
    /// configured listener. Fails fast at startup rather than as a
    /// runtime panic the first time an RPC arrives.
    pub fn validate(&self) -> Result<()> {
        if self.virtual_storages.is_empty() {
            return Err(Error::InvalidArgument("at least one virtual storage is required".into()));
        }
        for vs in &self.virtual_storages {
            if vs.nodes.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "virtual storage '{}' has no nodes",
                    vs.name
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for node in &vs.nodes {
                if !seen.insert(&node.storage) {
                    return Err(Error::InvalidArgument(format!(
                        "virtual storage '{}' has duplicate storage name '{}'",
                        vs.name, node.storage
                    )));
                }
            }
            if let Some(primary) = &vs.primary {
                if !vs.nodes.iter().any(|n| &n.storage == primary) {
                    return Err(Error::InvalidArgument(format!(
                        "virtual storage '{}' primary '{}' is not among its nodes",
                        vs.name, primary
                    )));
                }
            }
        }
        let threshold = self.transaction.default_threshold;
        let in_range = threshold == 0.5 || (threshold > 0.5 && threshold <= 1.0);
        if !in_range {
            return Err(Error::InvalidArgument(
                "transaction.default_threshold must be in (0.5, 1.0] (0.5 itself is accepted as 'simple majority')".into(),
            ));
        }
        if self.listen.tcp.is_none() && self.listen.tls.is_none() && self.listen.unix.is_none() {
            return Err(Error::InvalidArgument("at least one listener must be configured".into()));
        }
        Ok(())
    }

    pub fn virtual_storage(&self, name: &str) -> Option<&VirtualStorage> {
        self.virtual_storages.iter().find(|vs| vs.name == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Config {
        toml::from_str(
            r#"
            auth_token = "secret"

            [[virtual_storages]]
            name = "default"
            [[virtual_storages.nodes]]
            storage = "gitaly-1"
            address = "tcp://gitaly-1:9999"
            token = "t1"
            [[virtual_storages.nodes]]
            storage = "gitaly-2"
            address = "tcp://gitaly-2:9999"
            token = "t2"

            [listen]
            tcp = "0.0.0.0:2305"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn duplicate_storage_names_are_rejected() {
        let mut cfg = sample();
        cfg.virtual_storages[0].nodes[1].storage = "gitaly-1".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_listener_is_rejected() {
        let mut cfg = sample();
        cfg.listen.tcp = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_fill_in_replication_tuning() {
        let cfg = sample();
        assert_eq!(cfg.replication.batch_size, 10);
        assert_eq!(cfg.failover.election_strategy, ElectionStrategy::Sql);
    }
}
