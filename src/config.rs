// src/config.rs
//! Configuration file parsing for the composemd tool
//!
//! Supports TOML configuration files with the following sections:
//! - [localize] - Concurrency, timeouts, retries
//! - [upgrade] - Base URL and checksum computation
//!
//! Every key is optional; missing keys fall back to the library defaults.

use crate::error::{Error, Result};
use crate::localize::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_SECS,
    LocalizeOptions,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Localization settings
    #[serde(default)]
    pub localize: LocalizeSection,

    /// Upgrade settings
    #[serde(default)]
    pub upgrade: UpgradeSection,
}

/// Localization configuration section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalizeSection {
    /// Transfers in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub skip_existing: bool,
}

impl Default for LocalizeSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            skip_existing: false,
        }
    }
}

/// Upgrade configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeSection {
    /// Prefix for artifact URLs (relative references when unset)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Hash files instead of trusting recorded values
    #[serde(default)]
    pub compute_checksums: bool,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.localize.concurrency == 0 {
            return Err(Error::ConfigError(
                "localize.concurrency must be at least 1".to_string(),
            ));
        }
        if self.localize.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "localize.timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(base) = &self.upgrade.base_url {
            url::Url::parse(base).map_err(|e| {
                Error::ConfigError(format!("Invalid upgrade.base_url '{base}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn localize_options(&self) -> LocalizeOptions {
        LocalizeOptions {
            concurrency: self.localize.concurrency,
            timeout: Duration::from_secs(self.localize.timeout_secs),
            max_retries: self.localize.max_retries,
            retry_delay: Duration::from_millis(self.localize.retry_delay_ms),
            skip_existing: self.localize.skip_existing,
        }
    }
}
