//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (e.g. the CLI's `--config`)
//! 2. `~/.vellum/config.toml` (user)
//! 3. `/etc/vellum/config.toml` (system)
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [credits]
//! free_monthly_credits = 30
//! bypass = false
//!
//! [ledger]
//! max_attempts = 5
//! retry_delay_ms = 10
//!
//! [cache.defaults]
//! single_flight = true
//!
//! [cache.operations.ats-analysis]
//! max_entries = 250
//! ttl_secs = 1800
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::credits::{AiOperation, DEFAULT_FREE_MONTHLY_CREDITS, LedgerConfig, PlanLimits};
use crate::{Result, VellumError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Plan allowances and the quota gate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreditsConfig {
    /// Monthly allowance of the free plan (default: 30).
    #[serde(default = "default_free_monthly_credits")]
    pub free_monthly_credits: u32,
    /// Admit every request without metering (default: false).
    #[serde(default)]
    pub bypass: bool,
    /// How long a resolved plan is reused, in seconds (default: 60).
    #[serde(default = "default_plan_cache_ttl")]
    pub plan_cache_ttl_secs: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            free_monthly_credits: default_free_monthly_credits(),
            bypass: false,
            plan_cache_ttl_secs: default_plan_cache_ttl(),
        }
    }
}

fn default_free_monthly_credits() -> u32 {
    DEFAULT_FREE_MONTHLY_CREDITS
}

fn default_plan_cache_ttl() -> u64 {
    60
}

/// Ledger transaction retries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerSettings {
    /// Attempts per deduction on store conflicts (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial retry delay in milliseconds, doubled per retry (default: 10).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    10
}

/// Response cache settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CacheSettings {
    /// Applied to every operation before its own override.
    #[serde(default)]
    pub defaults: CacheOverride,
    /// Per-operation overrides, keyed by operation name.
    #[serde(default)]
    pub operations: BTreeMap<AiOperation, CacheOverride>,
}

/// Optional cache fields; unset fields keep the inherited value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CacheOverride {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub cost_per_miss: Option<f64>,
    #[serde(default)]
    pub single_flight: Option<bool>,
}

impl CacheOverride {
    fn validate(&self, section: &str) -> Result<()> {
        if self.cost_per_miss.is_some_and(|c| !c.is_finite() || c < 0.0) {
            return Err(VellumError::Configuration(format!(
                "{section}.cost_per_miss must be a non-negative number"
            )));
        }
        Ok(())
    }

    fn apply(&self, mut config: CacheConfig) -> CacheConfig {
        if let Some(n) = self.max_entries {
            config = config.max_entries(n);
        }
        if let Some(secs) = self.ttl_secs {
            config = config.ttl(Duration::from_secs(secs));
        }
        if let Some(cost) = self.cost_per_miss {
            config = config.cost_per_miss(cost);
        }
        if let Some(enabled) = self.single_flight {
            config = config.single_flight(enabled);
        }
        config
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.vellum/config.toml`
    /// 3. `/etc/vellum/config.toml`
    ///
    /// With no explicit path and no file at either location, the built-in
    /// defaults are returned.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            VellumError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            VellumError::Configuration(msg) => {
                VellumError::Configuration(format!("{msg} (in {path:?})"))
            }
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| VellumError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.credits.free_monthly_credits == 0 {
            return Err(VellumError::Configuration(
                "credits.free_monthly_credits must be at least 1".to_string(),
            ));
        }
        if self.ledger.max_attempts == 0 {
            return Err(VellumError::Configuration(
                "ledger.max_attempts must be at least 1".to_string(),
            ));
        }
        self.cache.defaults.validate("cache.defaults")?;
        for (op, over) in &self.cache.operations {
            over.validate(&format!("cache.operations.{op}"))?;
        }
        Ok(())
    }

    /// Effective cache settings for `operation`.
    pub fn cache_config(&self, operation: AiOperation) -> CacheConfig {
        let config = self.cache.defaults.apply(operation.default_cache_config());
        match self.cache.operations.get(&operation) {
            Some(over) => over.apply(config),
            None => config,
        }
    }

    /// Effective ledger settings.
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::new()
            .limits(PlanLimits::new(self.credits.free_monthly_credits))
            .max_attempts(self.ledger.max_attempts)
            .retry_delay(Duration::from_millis(self.ledger.retry_delay_ms))
    }

    pub fn plan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.credits.plan_cache_ttl_secs)
    }

    /// Resolve the config file path. `Ok(None)` means use defaults.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(VellumError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vellum").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/vellum/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}
