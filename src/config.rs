//! Configuration module for the TRON transaction manager
//!
//! This module handles configuration loading from TOML files and environment
//! variables, and provides the structured `TronTxmConfig` consumed by the TXM.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading/validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse TOML: {0}")]
    Parse(String),

    #[error("Invalid environment override {key}={value}")]
    Env { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Receipt result codes that drive the confirm loop's classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCodeTable {
    /// Contract results that are final failures (no resubmission)
    #[serde(default = "default_fatal_codes")]
    pub fatal: Vec<String>,

    /// Contract results treated as successful execution
    #[serde(default = "default_success_codes")]
    pub success: Vec<String>,
}

impl Default for ResultCodeTable {
    fn default() -> Self {
        Self {
            fatal: default_fatal_codes(),
            success: default_success_codes(),
        }
    }
}

impl ResultCodeTable {
    pub fn is_fatal(&self, code: &str) -> bool {
        self.fatal.iter().any(|c| c == code)
    }

    pub fn is_success(&self, code: &str) -> bool {
        self.success.iter().any(|c| c == code)
    }
}

/// Transaction manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TronTxmConfig {
    /// Capacity of the bounded broadcast queue
    #[serde(default = "default_broadcast_chan_size")]
    pub broadcast_chan_size: usize,

    /// Confirm loop polling period in seconds
    #[serde(default = "default_confirm_poll_secs")]
    pub confirm_poll_secs: u64,

    /// Fee limit multiplier applied once per energy bump
    #[serde(default = "default_energy_multiplier")]
    pub energy_multiplier: f64,

    /// How long finalized/fatal transactions stay queryable
    #[serde(default = "default_retention_period_secs")]
    pub retention_period_secs: u64,

    /// Reap loop period in seconds
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Broadcast attempt ceiling
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// OUT_OF_TIME retry ceiling
    #[serde(default = "default_max_out_of_time_errors")]
    pub max_out_of_time_errors: u32,

    /// Delay between busy/unsolidified broadcast retries
    #[serde(default = "default_broadcast_retry_delay_ms")]
    pub broadcast_retry_delay_ms: u64,

    /// Cap on the total time spent retrying one broadcast
    #[serde(default = "default_broadcast_max_retry_secs")]
    pub broadcast_max_retry_secs: u64,

    /// Lifetime of the cached energy unit price
    #[serde(default = "default_energy_price_refresh_secs")]
    pub energy_price_refresh_secs: u64,

    /// Price (SUN per energy unit) used when the node feed is unusable
    #[serde(default = "default_energy_unit_price")]
    pub default_energy_unit_price: i64,

    /// Expiration window added to the reference time of a new transaction
    #[serde(default = "default_tx_expiration_ms")]
    pub tx_expiration_ms: i64,

    /// Receipt classification table
    #[serde(default)]
    pub result_codes: ResultCodeTable,
}

// Default value functions
fn default_broadcast_chan_size() -> usize { 100 }
fn default_confirm_poll_secs() -> u64 { 5 }
fn default_energy_multiplier() -> f64 { 1.5 }
fn default_retention_period_secs() -> u64 { 3600 }
fn default_reap_interval_secs() -> u64 { 60 }
fn default_max_attempts() -> u32 { 5 }
fn default_max_out_of_time_errors() -> u32 { 2 }
fn default_broadcast_retry_delay_ms() -> u64 { 2000 }
fn default_broadcast_max_retry_secs() -> u64 { 30 }
fn default_energy_price_refresh_secs() -> u64 { 60 }
fn default_energy_unit_price() -> i64 { 420 }
fn default_tx_expiration_ms() -> i64 { 30_000 }

fn default_fatal_codes() -> Vec<String> {
    [
        "REVERT",
        "BAD_JUMP_DESTINATION",
        "OUT_OF_MEMORY",
        "STACK_TOO_SMALL",
        "STACK_TOO_LARGE",
        "STACK_OVERFLOW",
        "JVM_STACK_OVER_FLOW",
        "ILLEGAL_OPERATION",
        "TRANSFER_FAILED",
        "INVALID_CODE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_success_codes() -> Vec<String> {
    vec!["SUCCESS".to_string(), "DEFAULT".to_string()]
}

impl Default for TronTxmConfig {
    fn default() -> Self {
        Self {
            broadcast_chan_size: default_broadcast_chan_size(),
            confirm_poll_secs: default_confirm_poll_secs(),
            energy_multiplier: default_energy_multiplier(),
            retention_period_secs: default_retention_period_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            max_attempts: default_max_attempts(),
            max_out_of_time_errors: default_max_out_of_time_errors(),
            broadcast_retry_delay_ms: default_broadcast_retry_delay_ms(),
            broadcast_max_retry_secs: default_broadcast_max_retry_secs(),
            energy_price_refresh_secs: default_energy_price_refresh_secs(),
            default_energy_unit_price: default_energy_unit_price(),
            tx_expiration_ms: default_tx_expiration_ms(),
            result_codes: ResultCodeTable::default(),
        }
    }
}

impl TronTxmConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TronTxmConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `.env` and `TRON_TXM_*` environment overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRON_TXM_<FIELD>` overrides from the given variables
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix("TRON_TXM_") else {
                continue;
            };
            let bad = || ConfigError::Env {
                key: key.clone(),
                value: value.clone(),
            };
            match field {
                "BROADCAST_CHAN_SIZE" => self.broadcast_chan_size = value.parse().map_err(|_| bad())?,
                "CONFIRM_POLL_SECS" => self.confirm_poll_secs = value.parse().map_err(|_| bad())?,
                "ENERGY_MULTIPLIER" => self.energy_multiplier = value.parse().map_err(|_| bad())?,
                "RETENTION_PERIOD_SECS" => self.retention_period_secs = value.parse().map_err(|_| bad())?,
                "REAP_INTERVAL_SECS" => self.reap_interval_secs = value.parse().map_err(|_| bad())?,
                "MAX_ATTEMPTS" => self.max_attempts = value.parse().map_err(|_| bad())?,
                "DEFAULT_ENERGY_UNIT_PRICE" => self.default_energy_unit_price = value.parse().map_err(|_| bad())?,
                "TX_EXPIRATION_MS" => self.tx_expiration_ms = value.parse().map_err(|_| bad())?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_chan_size == 0 {
            return Err(ConfigError::Invalid("broadcast_chan_size must be > 0".into()));
        }
        if self.confirm_poll_secs == 0 {
            return Err(ConfigError::Invalid("confirm_poll_secs must be > 0".into()));
        }
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Invalid("reap_interval_secs must be > 0".into()));
        }
        if !(self.energy_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "energy_multiplier must be >= 1.0, got {}",
                self.energy_multiplier
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be > 0".into()));
        }
        if self.default_energy_unit_price <= 0 {
            return Err(ConfigError::Invalid("default_energy_unit_price must be > 0".into()));
        }
        if self.tx_expiration_ms <= 0 {
            return Err(ConfigError::Invalid("tx_expiration_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_secs(self.confirm_poll_secs)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn broadcast_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_retry_delay_ms)
    }

    pub fn broadcast_max_retry(&self) -> Duration {
        Duration::from_secs(self.broadcast_max_retry_secs)
    }

    pub fn energy_price_refresh(&self) -> Duration {
        Duration::from_secs(self.energy_price_refresh_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = TronTxmConfig::default();
        assert_eq!(config.broadcast_chan_size, 100);
        assert_eq!(config.energy_multiplier, 1.5);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_out_of_time_errors, 2);
        assert!(config.validate().is_ok());
        assert!(config.result_codes.is_fatal("REVERT"));
        assert!(config.result_codes.is_success("SUCCESS"));
        assert!(!config.result_codes.is_fatal("OUT_OF_ENERGY"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = TronTxmConfig::from_toml_str(
            r#"
            broadcast_chan_size = 8
            energy_multiplier = 2.0

            [result_codes]
            fatal = ["REVERT"]
            "#,
        )
        .unwrap();
        assert_eq!(config.broadcast_chan_size, 8);
        assert_eq!(config.energy_multiplier, 2.0);
        assert_eq!(config.confirm_poll_secs, 5);
        assert_eq!(config.result_codes.fatal, vec!["REVERT".to_string()]);
        assert!(config.result_codes.is_success("DEFAULT"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reap_interval_secs = 7").unwrap();
        let config = TronTxmConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.reap_interval(), Duration::from_secs(7));

        assert!(matches!(
            TronTxmConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = TronTxmConfig {
            energy_multiplier: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(TronTxmConfig::from_toml_str("broadcast_chan_size = 0").is_err());
        assert!(TronTxmConfig::from_toml_str("broadcast_chan_size = \"lots\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TronTxmConfig::default();
        config
            .apply_env_overrides(vec![
                ("TRON_TXM_MAX_ATTEMPTS".to_string(), "3".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        assert_eq!(config.max_attempts, 3);

        let err = config
            .apply_env_overrides(vec![("TRON_TXM_CONFIRM_POLL_SECS".to_string(), "soon".to_string())])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }
}
