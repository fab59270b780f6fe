//! Simulation options and worker pool sizing

use crate::entities::Snapshot;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Per-request simulation switches
///
/// Every field defaults to off or empty. TOML files may set any field except
/// `overlay`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Skip request validation and condition-key applicability checks
    pub skip_service_authorization_validation: bool,
    pub enable_tracing: bool,
    /// Reject requests that would evaluate an unknown condition operator
    pub fail_on_unknown_condition_operator: bool,
    /// Context properties seeded into every request
    pub context: BTreeMap<String, String>,
    pub multi_context: BTreeMap<String, Vec<String>>,
    /// Entities consulted before the base graph
    #[serde(skip)]
    pub overlay: Option<Arc<Snapshot>>,
    /// Object key used to expand S3 buckets into an object resource
    pub default_s3_object_key: Option<String>,
    pub enable_fuzzy_arn_matching: bool,
    /// Fail on entities with unresolved references
    pub strict: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_overlay(mut self, overlay: Snapshot) -> Self {
        self.overlay = Some(Arc::new(overlay));
        self
    }
}

pub const DEFAULT_BATCH_SIZE: usize = 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const NUM_WORKERS_ENV: &str = "IAMSIM_NUM_WORKERS";
pub const BATCH_SIZE_ENV: &str = "IAMSIM_BATCH_SIZE";
pub const TIMEOUT_ENV: &str = "IAMSIM_TIMEOUT";

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub num_workers: usize,
    /// Jobs per batch submitted by `product`
    pub batch_size: usize,
    /// Upper bound on waiting for one batch result
    pub timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            num_workers: default_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl PoolConfig {
    pub fn new(num_workers: usize, batch_size: usize, timeout: Duration) -> Self {
        let defaults = PoolConfig::default();
        PoolConfig {
            num_workers: if num_workers == 0 { defaults.num_workers } else { num_workers },
            batch_size: if batch_size == 0 { defaults.batch_size } else { batch_size },
            timeout_secs: timeout.as_secs().max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read `IAMSIM_NUM_WORKERS`, `IAMSIM_BATCH_SIZE` and `IAMSIM_TIMEOUT`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unset, unparsable or zero values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| -> Option<u64> {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&v| v > 0)
        };

        let mut config = PoolConfig::default();
        if let Some(n) = read(NUM_WORKERS_ENV) {
            config.num_workers = n as usize;
        }
        if let Some(n) = read(BATCH_SIZE_ENV) {
            config.batch_size = n as usize;
        }
        if let Some(n) = read(TIMEOUT_ENV) {
            config.timeout_secs = n;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert!(!options.skip_service_authorization_validation);
        assert!(!options.enable_tracing);
        assert!(options.context.is_empty());
        assert!(options.overlay.is_none());
        assert!(options.default_s3_object_key.is_none());
    }

    #[test]
    fn test_from_toml() {
        let options = Options::from_toml_str(
            r#"
            enable_tracing = true
            strict = true
            default_s3_object_key = "index.html"

            [context]
            "aws:SourceIp" = "10.1.2.3"

            [multi_context]
            "aws:TagKeys" = ["a", "b"]
            "#,
        )
        .unwrap();

        assert!(options.enable_tracing);
        assert!(options.strict);
        assert!(!options.enable_fuzzy_arn_matching);
        assert_eq!(options.default_s3_object_key.as_deref(), Some("index.html"));
        assert_eq!(options.context["aws:SourceIp"], "10.1.2.3");
        assert_eq!(options.multi_context["aws:TagKeys"], vec!["a", "b"]);
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        assert!(Options::from_toml_str("strict = \"yes\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enable_fuzzy_arn_matching = true").unwrap();

        let options = Options::load(file.path()).unwrap();
        assert!(options.enable_fuzzy_arn_matching);

        assert!(Options::load(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn test_pool_config_from_lookup() {
        let env: HashMap<&str, &str> = [
            (NUM_WORKERS_ENV, "3"),
            (BATCH_SIZE_ENV, "not-a-number"),
            (TIMEOUT_ENV, "5"),
        ]
        .into_iter()
        .collect();

        let config = PoolConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_pool_config_zero_falls_back() {
        let config = PoolConfig::from_lookup(|name| {
            (name == NUM_WORKERS_ENV).then(|| "0".to_string())
        });
        assert!(config.num_workers >= 1);

        let config = PoolConfig::new(0, 0, Duration::from_millis(10));
        assert!(config.num_workers >= 1);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.timeout_secs, 1);
    }
}
