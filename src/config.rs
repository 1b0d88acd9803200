//! Executor and cluster configuration.
//!
//! Loaded from JSON; every field has a default so partial documents work.

use serde::{Deserialize, Serialize};

use crate::cluster::DEFAULT_PARTITION_N;
use crate::{Error, Result};

fn default_host() -> String {
    "localhost:10101".into()
}

fn default_max_concurrency() -> usize {
    1
}

fn default_replica_n() -> usize {
    1
}

fn default_partition_n() -> u64 {
    DEFAULT_PARTITION_N
}

/// Settings for one node's executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Address this node answers on; shards owned by it are evaluated locally.
    #[serde(default = "default_host")]
    pub host: String,

    /// Shard groups evaluated concurrently. 1 visits groups one at a time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Upper bound on a single remote call. `None` waits for the peer.
    #[serde(default)]
    pub remote_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_concurrency: default_max_concurrency(),
            remote_timeout_ms: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default() }
    }
}

/// Static cluster membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default = "default_replica_n")]
    pub replica_n: usize,

    #[serde(default = "default_partition_n")]
    pub partition_n: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            replica_n: default_replica_n(),
            partition_n: default_partition_n(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.host.is_empty() {
            return Err(Error::ConfigError("executor.host must not be empty".into()));
        }
        if self.executor.max_concurrency == 0 {
            return Err(Error::ConfigError("executor.max_concurrency must be at least 1".into()));
        }
        if !self.cluster.hosts.is_empty() && !self.cluster.hosts.contains(&self.executor.host) {
            return Err(Error::ConfigError(format!(
                "executor.host {:?} is not a cluster member",
                self.executor.host
            )));
        }
        Ok(())
    }
}
