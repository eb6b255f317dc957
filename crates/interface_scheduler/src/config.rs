//! Scheduler configuration

use std::time::Duration;

use core_kernel::Timezone;
use infra_db::{DatabaseConfig, GenerationConfig};
use serde::Deserialize;

/// Scheduler configuration
///
/// Read from `SCHEDULER_*` environment variables; unset keys keep their
/// defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Database URL
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// IANA timezone whose calendar day decides what is due
    pub timezone: Timezone,
    /// Maximum rows each phase reads per sweep
    pub batch_size: i64,
    /// Seconds between sweeps; 0 runs a single sweep and exits
    pub run_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/tuition_billing".to_string(),
            max_connections: 10,
            min_connections: 2,
            log_level: "info".to_string(),
            timezone: Timezone::default(),
            batch_size: 500,
            run_interval_secs: 0,
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("SCHEDULER"))
            .build()?
            .try_deserialize()
    }

    /// Pool settings for [`infra_db::create_pool`]
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            batch_size: self.batch_size,
            timezone: self.timezone,
        }
    }

    /// The pause between sweeps, or `None` for a single sweep
    pub fn run_interval(&self) -> Option<Duration> {
        (self.run_interval_secs > 0).then(|| Duration::from_secs(self.run_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_run_once_in_utc() {
        let config = SchedulerConfig::default();
        assert_eq!(config.run_interval(), None);
        assert_eq!(config.generation().batch_size, 500);
        assert_eq!(config.generation().timezone, Timezone::default());
        assert_eq!(config.database().max_connections, 10);
    }

    #[test]
    fn test_keys_are_read_from_a_source() {
        let config: SchedulerConfig = config::Config::builder()
            .set_override("timezone", "Asia/Tokyo")
            .unwrap()
            .set_override("batch_size", 50)
            .unwrap()
            .set_override("run_interval_secs", 3600)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.timezone, "Asia/Tokyo".parse().unwrap());
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.run_interval(), Some(Duration::from_secs(3600)));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let result: Result<SchedulerConfig, _> = config::Config::builder()
            .set_override("timezone", "Mars/Olympus_Mons")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn test_interval_matches_seconds(secs in 1u64..86_400) {
            let config = SchedulerConfig { run_interval_secs: secs, ..SchedulerConfig::default() };
            prop_assert_eq!(config.run_interval(), Some(Duration::from_secs(secs)));
        }
    }
}
