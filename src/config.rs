use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SweepError};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub bluesky: BlueskyConfig,
    pub limits: LimitsConfig,
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BlueskyConfig {
    /// PDS used when an account is added without an explicit service
    pub service: String,
    pub collection: String,
    pub request_timeout_secs: u64,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: "https://bsky.social".to_string(),
            collection: "app.bsky.feed.post".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Quotas published by the PDS (https://atproto.com/blog/rate-limits-pds-v3).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Points shared by every account per reset interval
    pub points_global: u32,
    pub reset_interval_secs: u64,
    /// Upper bound on listing pages fetched per account and cycle
    pub max_pages_per_account: usize,
    pub list_records_limit: usize,
    pub apply_writes_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            points_global: 2500,
            reset_interval_secs: 300,
            max_pages_per_account: 200,
            list_records_limit: 100,
            apply_writes_limit: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub dry_run: bool,
    pub interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            interval_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sweeper.db".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then `SWEEPER_*` environment variables.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SWEEPER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.points_global == 0 {
            return Err(SweepError::Config("limits.points_global must be greater than 0".to_string()));
        }
        if self.limits.reset_interval_secs == 0 {
            return Err(SweepError::Config("limits.reset_interval_secs must be greater than 0".to_string()));
        }
        if self.limits.max_pages_per_account == 0 {
            return Err(SweepError::Config("limits.max_pages_per_account must be greater than 0".to_string()));
        }
        if self.limits.list_records_limit == 0 {
            return Err(SweepError::Config("limits.list_records_limit must be greater than 0".to_string()));
        }
        if self.limits.apply_writes_limit == 0 {
            return Err(SweepError::Config("limits.apply_writes_limit must be greater than 0".to_string()));
        }
        if self.worker.interval_secs == 0 {
            return Err(SweepError::Config("worker.interval_secs must be greater than 0".to_string()));
        }
        if self.bluesky.collection.trim().is_empty() {
            return Err(SweepError::Config("bluesky.collection must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.limits.reset_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.bluesky.request_timeout_secs)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.worker.dry_run);
        assert_eq!(config.limits.points_global, 2500);
        assert_eq!(config.reset_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.limits.apply_writes_limit = 0;
        assert!(matches!(config.validate(), Err(SweepError::Config(_))));
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweeper.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[limits]\npoints_global = 100\n\n[worker]\ndry_run = false").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.limits.points_global, 100);
        assert_eq!(config.limits.apply_writes_limit, 10);
        assert!(!config.worker.dry_run);
        assert_eq!(config.bluesky.collection, "app.bsky.feed.post");
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweeper.toml");
        std::fs::write(&path, "[limits]\nreset_interval_secs = 0\n").unwrap();

        assert!(Config::load(path.to_str().unwrap()).is_err());
    }
}
