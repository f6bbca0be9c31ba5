/**
 * @module config
 * @description Configuration management for the ledger engine
 *
 * This module provides a flexible configuration system that supports both file-based
 * and default configurations. Every tunable named in the processing pipeline lives
 * here: retry limits, backoff intervals, OCC attempt budgets, worker pool sizing,
 * and the idempotency secret.
 *
 * ## Configuration Loading Strategy
 *
 * The `load_config()` function implements a smart search algorithm:
 * 1. Use the explicit path when one is given
 * 2. Otherwise start from the executable's directory
 * 3. Search up to 3 parent directories for config.yaml
 * 4. Fall back to hardcoded defaults if no file found
 *
 * This approach supports multiple deployment scenarios:
 * - Development: config.yaml in project root
 * - Testing: explicit path per test environment
 * - Production: config.yaml alongside executable
 *
 * ## Configuration Structures
 *
 * ### Config (root)
 * Top-level container aggregating all configuration sections.
 *
 * ### LedgerConfig
 * - `data_dir`: Directory holding the sled database (default: "tally_data")
 * - `idempotency_secret`: HMAC secret for idempotency key hashing
 *
 * The secret must be identical across every process sharing a data directory,
 * otherwise resubmissions hash to different keys and duplicate detection breaks.
 *
 * ### QueueConfig
 * - `max_retries`: Failed attempts before a command is dead-lettered (default: 5)
 * - `retry_interval_ms`: Base delay for the exponential retry backoff (default: 1000)
 * - `retry_backoff_cap_ms`: Ceiling for the retry backoff (default: 60000)
 *
 * ### OccConfig
 * - `max_occ_retries`: Consecutive stale-version collisions tolerated before the
 *   command is parked as occ_timeout (default: 5)
 * - `backoff_base_ms`: Base sleep between OCC attempts (default: 20)
 *
 * OCC collisions are expected under contention and cheap to retry; the backoff here
 * is deliberately much shorter than the queue-level retry interval.
 *
 * ### WorkerConfig
 * - `count`: Number of concurrent worker loops (default: 4)
 * - `poll_interval_ms`: Sleep between queue polls when idle (default: 100)
 * - `claim_batch_size`: Runnable commands fetched per poll (default: 16)
 *
 * ## Default Values
 *
 * All configuration structures implement Default trait for robustness:
 * - Missing sections use defaults via serde(default)
 * - Individual fields use field-level defaults where appropriate
 * - Entire config falls back to Config::default() if file errors occur
 *
 * ## Error Handling
 *
 * Configuration loading is resilient:
 * - File not found: Use defaults (common in development)
 * - Parse errors: Log and use defaults (prevents startup failure)
 *
 * This approach prioritizes service availability over configuration perfection.
 */

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

// Configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub occ: OccConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_idempotency_secret")]
    pub idempotency_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_retry_backoff_cap_ms")]
    pub retry_backoff_cap_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OccConfig {
    #[serde(default = "default_max_occ_retries")]
    pub max_occ_retries: u32,
    #[serde(default = "default_occ_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: usize,
}

fn default_data_dir() -> String {
    "tally_data".to_string()
}

fn default_idempotency_secret() -> String {
    "tally-dev-secret".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_retry_backoff_cap_ms() -> u64 {
    60000 // 1 minute
}

fn default_max_occ_retries() -> u32 {
    5
}

fn default_occ_backoff_base_ms() -> u64 {
    20
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_claim_batch_size() -> usize {
    16
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_dir: default_data_dir(),
            idempotency_secret: default_idempotency_secret(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_backoff_cap_ms: default_retry_backoff_cap_ms(),
        }
    }
}

impl Default for OccConfig {
    fn default() -> Self {
        OccConfig {
            max_occ_retries: default_max_occ_retries(),
            backoff_base_ms: default_occ_backoff_base_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            claim_batch_size: default_claim_batch_size(),
        }
    }
}

// Load configuration from file
pub fn load_config(explicit_path: Option<&str>) -> Config {
    // An explicit path is authoritative: a missing or broken file is loud
    if let Some(path) = explicit_path {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    debug!("📄 Loaded configuration from {}", path);
                    return validated(config);
                }
                Err(e) => {
                    error!("Error parsing {}: {}", path, e);
                }
            },
            Err(e) => {
                error!("Error reading {}: {}", path, e);
            }
        }
        debug!("📄 Using default configuration");
        return validated(Config::default());
    }

    // Determine the executable directory
    let exe_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    let exe_dir = exe_path.parent().unwrap_or_else(|| Path::new("."));

    // Try to find config.yaml in parent directories
    let mut config_path = PathBuf::from(exe_dir);
    let mut found = false;

    // First check if config exists in the current directory
    if config_path.join("config.yaml").exists() {
        found = true;
    } else {
        // Try up to 3 parent directories
        for _ in 0..3 {
            config_path = match config_path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => break,
            };

            if config_path.join("config.yaml").exists() {
                found = true;
                break;
            }
        }
    }

    // If config.yaml was found, try to load it
    if found {
        let config_file = config_path.join("config.yaml");
        match fs::read_to_string(&config_file) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    debug!("📄 Loaded configuration from {:?}", config_file);
                    return validated(config);
                }
                Err(e) => {
                    error!("Error parsing config.yaml: {}", e);
                }
            },
            Err(e) => {
                error!("Error reading config.yaml: {}", e);
            }
        }
    }

    // If we get here, use default configuration
    debug!("📄 Using default configuration");
    validated(Config::default())
}

// Warn on values that are technically loadable but operationally suspect
fn validated(config: Config) -> Config {
    if config.ledger.idempotency_secret == default_idempotency_secret() {
        warn!("Using the built-in idempotency secret - set ledger.idempotency_secret for production");
    }
    if config.queue.max_retries == 0 {
        warn!("queue.max_retries is 0 - every failed command will dead-letter immediately");
    }
    if config.occ.max_occ_retries == 0 {
        warn!("occ.max_occ_retries is 0 - any balance contention will park commands as occ_timeout");
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ledger.data_dir, "tally_data");
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.retry_interval_ms, 1000);
        assert_eq!(config.queue.retry_backoff_cap_ms, 60000);
        assert_eq!(config.occ.max_occ_retries, 5);
        assert_eq!(config.occ.backoff_base_ms, 20);
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.poll_interval_ms, 100);
        assert_eq!(config.worker.claim_batch_size, 16);
    }

    #[test]
    fn test_partial_yaml_uses_field_defaults() {
        let yaml = r#"
queue:
  max_retries: 2
occ:
  backoff_base_ms: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.queue.retry_interval_ms, 1000);
        assert_eq!(config.occ.backoff_base_ms, 5);
        assert_eq!(config.occ.max_occ_retries, 5);
        assert_eq!(config.worker.count, 4);
    }

    #[test]
    fn test_explicit_path_missing_falls_back_to_defaults() {
        let config = load_config(Some("/definitely/not/a/real/config.yaml"));
        assert_eq!(config.queue.max_retries, 5);
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_max_retries(), 5);
        assert_eq!(default_retry_interval_ms(), 1000);
        assert_eq!(default_max_occ_retries(), 5);
        assert_eq!(default_occ_backoff_base_ms(), 20);
        assert_eq!(default_worker_count(), 4);
    }
}
