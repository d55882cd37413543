// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::results::HowSaving;

/// Main configuration structure for the pipeline engine.
///
/// Selects the execution strategy and carries the executor tuning knobs and
/// the results-directory policy. Typically loaded from a YAML file.
///
/// # Example
/// ```yaml
/// strategy: cooperative
/// executor:
///   max_workers: 4
///   queue_capacity: 8
///   poll_interval_ms: 10
/// results:
///   postfix: piv
///   how: complete
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    pub strategy: Strategy,
    #[serde(default)]
    pub executor: ExecutorOptions,
    #[serde(default)]
    pub results: ResultsOptions,
}

/// Execution strategy driving the topology.
///
/// # Variants
/// * `Sequential` - single deterministic control loop, no concurrency
/// * `Cooperative` - cooperative tasks in one process, blocking calls
///   offloaded to a bounded worker pool
/// * `Hybrid` - threads for io works, worker processes for cpu works, with
///   a liveness watchdog
/// * `Distributed` - items dispatched to a pool of out-of-process servers
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    Cooperative,
    Hybrid,
    Distributed,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Cooperative => "cooperative",
            Strategy::Hybrid => "hybrid",
            Strategy::Distributed => "distributed",
        }
    }
}

/// Executor tuning options. Different strategies use different subsets.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecutorOptions {
    /// Cap on simultaneously active workers per admission counter (io and
    /// cpu each). Defaults to the number of CPU cores.
    pub max_workers: Option<usize>,
    /// Backpressure hint for queues that carry no bound of their own.
    pub queue_capacity: Option<usize>,
    /// Quantum between poll attempts of the cooperative tasks and control
    /// loops.
    pub poll_interval_ms: Option<u64>,
    /// How long a spawned worker process may take to report `Started`
    /// before the watchdog kills it.
    pub watchdog_timeout_ms: Option<u64>,
    /// Resident-memory threshold triggering degrade-to-drain mode in the
    /// hybrid executor. Unset disables the check.
    pub memory_limit_mb: Option<f64>,
    /// Command line launching a worker process (hybrid cpu works and
    /// distributed servers). Defaults to re-invoking the current executable
    /// with `--serve`.
    #[serde(default)]
    pub worker_command: Vec<String>,
    /// Size of the distributed server pool.
    pub servers: Option<usize>,
    /// Cap on unacknowledged submissions per distributed server.
    pub max_outstanding: Option<usize>,
    /// Whether an interrupted run should exit the process with the distinct
    /// signal exit code.
    #[serde(default)]
    pub has_to_exit: bool,
}

impl ExecutorOptions {
    pub fn max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_worker_count).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(8).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(10))
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms.unwrap_or(10_000))
    }

    pub fn servers(&self) -> usize {
        self.servers.unwrap_or(2).max(1)
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.unwrap_or(4).max(1)
    }

    /// The worker command, falling back to `current_exe --serve`.
    pub fn worker_command(&self) -> Vec<String> {
        if !self.worker_command.is_empty() {
            return self.worker_command.clone();
        }
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "flowline".to_string());
        vec![exe, "--serve".to_string()]
    }
}

/// Where and how to prepare the results directory.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResultsOptions {
    /// Explicit results directory; when unset, derived from the input
    /// directory plus `postfix`.
    pub path: Option<PathBuf>,
    /// Suffix appended to the input directory name.
    pub postfix: Option<String>,
    /// Policy when the directory already exists.
    #[serde(default)]
    pub how: HowSaving,
}

impl ResultsOptions {
    pub fn postfix(&self) -> &str {
        self.postfix.as_deref().unwrap_or("flowline")
    }
}

/// Errors loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Load a config from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a config from a YAML file and check cross-field constraints.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let cfg = load_config(path)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Cross-field validation, failing fast before any execution starts.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.executor.max_workers == Some(0) {
        return Err(ConfigError::Invalid {
            message: "executor.max_workers must be at least 1".to_string(),
        });
    }
    if cfg.executor.queue_capacity == Some(0) {
        return Err(ConfigError::Invalid {
            message: "executor.queue_capacity must be at least 1".to_string(),
        });
    }
    if cfg.strategy == Strategy::Distributed && cfg.executor.servers == Some(0) {
        return Err(ConfigError::Invalid {
            message: "executor.servers must be at least 1 for the distributed strategy"
                .to_string(),
        });
    }
    Ok(())
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_config() {
        let yaml = r#"
strategy: cooperative
executor:
  max_workers: 6
  queue_capacity: 4
results:
  postfix: piv
  how: recompute
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.strategy, Strategy::Cooperative);
        assert_eq!(cfg.executor.max_workers(), 6);
        assert_eq!(cfg.executor.queue_capacity(), 4);
        assert_eq!(cfg.results.postfix(), "piv");
        assert_eq!(cfg.results.how, HowSaving::Recompute);
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let cfg: Config = serde_yaml::from_str("strategy: sequential\n").unwrap();
        assert_eq!(cfg.strategy, Strategy::Sequential);
        assert!(cfg.executor.max_workers() >= 1);
        assert_eq!(cfg.executor.queue_capacity(), 8);
        assert_eq!(cfg.executor.poll_interval(), Duration::from_millis(10));
        assert_eq!(cfg.results.how, HowSaving::Ask);
        assert!(!cfg.executor.has_to_exit);
    }

    #[test]
    fn zero_workers_rejected() {
        let yaml = r#"
strategy: hybrid
executor:
  max_workers: 0
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn distributed_needs_servers() {
        let yaml = r#"
strategy: distributed
executor:
  servers: 0
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn load_and_validate_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "strategy: hybrid\n").unwrap();
        let cfg = load_and_validate_config(&path).unwrap();
        assert_eq!(cfg.strategy, Strategy::Hybrid);
    }
}
