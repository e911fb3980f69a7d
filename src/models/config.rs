//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::region::{Region, RegionRegistry};

/// Hard ceiling on series ids per upstream request.
pub const MAX_BATCH_SIZE: usize = 50;

/// Upper bound for schedule durations (ten years).
pub const MAX_SCHEDULE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Environment variable that overrides `upstream.registration_key`.
pub const API_KEY_ENV: &str = "BLS_API_KEY";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Batching, delay and freshness settings
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Datasets to keep updated
    #[serde(default = "defaults::datasets")]
    pub datasets: Vec<DatasetConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.upstream.registration_key = Some(key);
            }
        }
        self
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.upstream.endpoint)?;
        if self.upstream.user_agent.trim().is_empty() {
            return Err(AppError::validation("upstream.user_agent is empty"));
        }
        if self.upstream.timeout_secs == Some(0) {
            return Err(AppError::validation("upstream.timeout_secs must be > 0"));
        }
        if self.schedule.batch_size == 0 || self.schedule.batch_size > MAX_BATCH_SIZE {
            return Err(AppError::validation(format!(
                "schedule.batch_size must be within 1..={MAX_BATCH_SIZE}"
            )));
        }
        if self.schedule.cache_ttl_secs == 0 || self.schedule.cache_ttl_secs > MAX_SCHEDULE_SECS {
            return Err(AppError::validation(format!(
                "schedule.cache_ttl_secs must be within 1..={MAX_SCHEDULE_SECS}"
            )));
        }
        if self.schedule.refresh_interval_secs == 0
            || self.schedule.refresh_interval_secs > MAX_SCHEDULE_SECS
        {
            return Err(AppError::validation(format!(
                "schedule.refresh_interval_secs must be within 1..={MAX_SCHEDULE_SECS}"
            )));
        }
        if self.datasets.is_empty() {
            return Err(AppError::validation("No datasets defined"));
        }

        let mut keys = std::collections::HashSet::new();
        for dataset in &self.datasets {
            if !keys.insert(dataset.key.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate dataset key '{}'",
                    dataset.key
                )));
            }
            let registry = dataset.registry()?;
            if registry.is_empty() {
                return Err(AppError::validation(format!(
                    "dataset '{}' has no regions",
                    dataset.key
                )));
            }
        }
        Ok(())
    }

    /// Find a dataset by key.
    pub fn dataset(&self, key: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.key == key)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
            datasets: defaults::datasets(),
        }
    }
}

/// Upstream time-series API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// POST endpoint for bulk series requests
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Optional API registration key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_key: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds; transport default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            registration_key: None,
            user_agent: defaults::user_agent(),
            timeout_secs: None,
        }
    }
}

/// Batching and freshness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Series ids per upstream request (at most 50)
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive batches in milliseconds
    #[serde(default = "defaults::batch_delay")]
    pub batch_delay_ms: u64,

    /// Lifetime of cached results in seconds
    #[serde(default = "defaults::cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Staleness check interval for periodic mode in seconds
    #[serde(default = "defaults::refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl ScheduleConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Cache lifetime, capped at [`MAX_SCHEDULE_SECS`].
    pub fn cache_ttl(&self) -> TimeDelta {
        i64::try_from(self.cache_ttl_secs.min(MAX_SCHEDULE_SECS))
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(|| TimeDelta::days(365 * 10))
    }

    /// Periodic check interval, capped at [`MAX_SCHEDULE_SECS`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.min(MAX_SCHEDULE_SECS))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            batch_delay_ms: defaults::batch_delay(),
            cache_ttl_secs: defaults::cache_ttl(),
            refresh_interval_secs: defaults::refresh_interval(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// One geometry dataset and the registry that keys it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset identifier, also used as the cache key
    pub key: String,

    /// Builtin registry name
    #[serde(default)]
    pub registry: String,

    /// Inline regions; replaces the builtin registry when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Region>,

    /// Collection name under `objects`
    #[serde(default = "defaults::collection")]
    pub collection: String,

    /// Original geometry document, relative to the storage directory
    pub source: PathBuf,

    /// Merged geometry document, relative to the storage directory
    pub output: PathBuf,
}

impl DatasetConfig {
    /// Build the region registry for this dataset.
    pub fn registry(&self) -> Result<RegionRegistry> {
        if !self.regions.is_empty() {
            return RegionRegistry::new(self.key.clone(), self.regions.clone());
        }
        RegionRegistry::builtin(&self.registry).ok_or_else(|| {
            AppError::config(format!(
                "dataset '{}': unknown registry '{}'",
                self.key, self.registry
            ))
        })
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::DatasetConfig;

    // Upstream defaults
    pub fn endpoint() -> String {
        "https://api.bls.gov/publicAPI/v2/timeseries/data/".into()
    }
    pub fn user_agent() -> String {
        "labormap/0.1 (+https://www.bls.gov/developers/)".into()
    }

    // Schedule defaults
    pub fn batch_size() -> usize {
        super::MAX_BATCH_SIZE
    }
    pub fn batch_delay() -> u64 {
        5_000
    }
    pub fn cache_ttl() -> u64 {
        24 * 60 * 60
    }
    pub fn refresh_interval() -> u64 {
        24 * 60 * 60
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn collection() -> String {
        "counties".into()
    }

    // Dataset defaults
    pub fn datasets() -> Vec<DatasetConfig> {
        vec![
            DatasetConfig {
                key: "colorado".into(),
                registry: "colorado".into(),
                regions: Vec::new(),
                collection: collection(),
                source: PathBuf::from("data/counties.json"),
                output: PathBuf::from("data/counties.merged.json"),
            },
            DatasetConfig {
                key: "utah".into(),
                registry: "utah".into(),
                regions: Vec::new(),
                collection: collection(),
                source: PathBuf::from("data/utah-counties.json"),
                output: PathBuf::from("data/utah-counties.merged.json"),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.batch_size, 50);
        assert_eq!(config.schedule.cache_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.datasets.len(), 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            batch_delay_ms = 3000
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.batch_delay(), Duration::from_secs(3));
        assert_eq!(config.schedule.batch_size, 50);
        assert_eq!(config.datasets[0].key, "colorado");
    }

    #[test]
    fn test_batch_size_ceiling() {
        let mut config = Config::default();
        config.schedule.batch_size = 51;
        assert!(config.validate().is_err());
        config.schedule.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_schedule_rejected() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            cache_ttl_secs = 10000000000000000
            refresh_interval_secs = 18446744073709551615
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
        assert_eq!(
            config.schedule.cache_ttl(),
            TimeDelta::seconds(MAX_SCHEDULE_SECS as i64)
        );
        assert_eq!(
            config.schedule.refresh_interval(),
            Duration::from_secs(MAX_SCHEDULE_SECS)
        );

        let mut config = Config::default();
        config.schedule.refresh_interval_secs = MAX_SCHEDULE_SECS + 1;
        assert!(config.validate().is_err());
        config.schedule.refresh_interval_secs = MAX_SCHEDULE_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inline_regions_override_builtin() {
        let config: Config = toml::from_str(
            r#"
            [[datasets]]
            key = "front-range"
            registry = "colorado"
            source = "a.json"
            output = "b.json"
            regions = [
                { name = "Denver", area_id = "08031" },
                { name = "Boulder", area_id = "08013" },
            ]
            "#,
        )
        .unwrap();
        let registry = config.datasets[0].registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(config.datasets[0].collection, "counties");
    }

    #[test]
    fn test_unknown_registry() {
        let mut config = Config::default();
        config.datasets[0].registry = "atlantis".into();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_duplicate_dataset_key() {
        let mut config = Config::default();
        config.datasets[1].key = "colorado".into();
        assert!(config.validate().is_err());
    }
}
