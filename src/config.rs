//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - stratalog.toml (default configuration)
//! - stratalog.local.toml (git-ignored local overrides)
//! - Environment variables (STRATALOG_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # stratalog.toml
//! [evaluation]
//! jobs = 4
//! sips = "max-bound"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! STRATALOG_EVALUATION__JOBS=8
//! STRATALOG_EVALUATION__SIPS=delta-input
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options read by the middle-end and the interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Select the provenance translation strategy: widens existence
    /// checks with rule and level numbers and disables inequality indices
    #[serde(default)]
    pub provenance: bool,

    /// SIPS metric used by the literal-reordering transformer
    #[serde(default = "default_sips")]
    pub sips: String,

    /// SIPS metric used during lowering to the relational form
    #[serde(default = "default_sips")]
    pub ram_sips: String,

    /// Path to a profile log seeding the profile-use analysis
    #[serde(default)]
    pub profile_use: Option<PathBuf>,

    /// Enable per-operation frequency counters
    #[serde(default)]
    pub profile: bool,

    /// Emit intermediate analysis dumps to the debug reporter
    #[serde(default)]
    pub debug_report: bool,

    /// Worker-thread count for parallel regions (0 = all available cores)
    #[serde(default)]
    pub jobs: usize,
}

fn default_sips() -> String {
    "all-bound".to_string()
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            provenance: false,
            sips: default_sips(),
            ram_sips: default_sips(),
            profile_use: None,
            profile: false,
            debug_report: false,
            jobs: 1,
        }
    }
}

impl EvaluationConfig {
    /// Resolve the configured worker count, mapping 0 to the core count
    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level() }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. stratalog.toml (base configuration)
    /// 2. stratalog.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (STRATALOG_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("stratalog.toml"))
            .merge(Toml::file("stratalog.local.toml"))
            .merge(Env::prefixed("STRATALOG_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("STRATALOG_").split("__"))
            .extract()
    }
}
