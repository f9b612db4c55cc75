//! Configuration management for the expression evaluator
//!
//! Settings are read from a TOML file, every field has a default, and a few
//! can be overridden from the environment:
//!
//! | variable                   | field                              |
//! |----------------------------|------------------------------------|
//! | `KUBA_EXPR_UNJOINED_OK`    | `evaluation.unjoined_ok`           |
//! | `KUBA_EXPR_COMPUTATIONS`   | `evaluation.enable_computations`   |
//! | `KUBA_EXPR_AUTODS`         | `evaluation.autods`                |
//! | `KUBA_EXPR_CACHE_ENTRIES`  | `cache.max_entries`                |
//! | `RUST_LOG`                 | `logging.log_level`                |
//!
//! ```toml
//! [evaluation]
//! unjoined_ok = false
//! enable_computations = true
//! autods = 0
//!
//! [cache]
//! enabled = true
//! max_entries = 1000
//!
//! [squelch]
//! rules = ["host=lab.*"]
//! ```

use crate::error::{Error, Result};
use crate::state::Squelches;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EvalConfig {
    /// Evaluation switches
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Backend query cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Squelch rules applied to fetched series
    #[serde(default)]
    pub squelch: SquelchConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Evaluation switches
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// Record the audit trail of intermediate computations
    #[serde(default = "default_true")]
    pub enable_computations: bool,

    /// Drop unjoined groups instead of pairing them with NaN placeholders
    #[serde(default)]
    pub unjoined_ok: bool,

    /// Downsample fetched series to at most this many points (0 = off)
    #[serde(default)]
    pub autods: usize,
}

/// Query cache settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Share backend responses between identical queries
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cached responses
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Squelch rules, each `key=regex[,key=regex...]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SquelchConfig {
    /// Rules; a series is dropped when every pair of any one rule matches
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enable_computations: true,
            unjoined_ok: false,
            autods: 0,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!("{} must be a boolean, got {:?}", name, raw))),
    }
}

fn parse_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| {
            Error::Configuration(format!(
                "{} must be a non-negative integer, got {:?}",
                name, raw
            ))
        })
}

impl EvalConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from a file, apply environment overrides and validate
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("KUBA_EXPR_UNJOINED_OK") {
            self.evaluation.unjoined_ok = parse_bool("KUBA_EXPR_UNJOINED_OK", &raw)?;
        }
        if let Ok(raw) = std::env::var("KUBA_EXPR_COMPUTATIONS") {
            self.evaluation.enable_computations = parse_bool("KUBA_EXPR_COMPUTATIONS", &raw)?;
        }
        if let Ok(raw) = std::env::var("KUBA_EXPR_AUTODS") {
            self.evaluation.autods = parse_usize("KUBA_EXPR_AUTODS", &raw)?;
        }
        if let Ok(raw) = std::env::var("KUBA_EXPR_CACHE_ENTRIES") {
            self.cache.max_entries = parse_usize("KUBA_EXPR_CACHE_ENTRIES", &raw)?;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.log_level = level;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(Error::Configuration(
                "cache.max_entries must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if self.logging.log_level.trim().is_empty() {
            return Err(Error::Configuration("logging.log_level cannot be empty".to_string()));
        }
        Squelches::parse(&self.squelch.rules)?;
        Ok(())
    }

    /// Serialize to pretty TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))
    }
}
