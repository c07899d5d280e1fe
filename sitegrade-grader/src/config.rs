//! Grader configuration
//!
//! Resolution order for the config file: `--config` → `SITEGRADE_CONFIG` →
//! `~/.config/sitegrade/grader.toml` → built-in defaults. Every section and
//! field is optional.
//!
//! ```toml
//! port = 5790
//!
//! [logging]
//! level = "info"
//!
//! [raster]
//! base_url = "http://raster.internal:8088"
//! rate_limit_per_second = 50
//!
//! [grading]
//! concurrency = 6
//! scale_ceiling = "default"
//! retained_runs = 100
//!
//! [grading.retry]
//! max_retries = 2
//!
//! [scales.quick]
//! radius_meters = 250.0
//! grid_resolution_meters = 50.0
//! max_samples = 100
//! ```
//!
//! `SITEGRADE_RASTER_URL` and `SITEGRADE_RASTER_API_KEY` override the file.

use crate::batch::ScaleReconciliation;
use crate::orchestrator::{NominalCosts, OrchestratorConfig, MAX_CONCURRENCY};
use crate::registry::PolicyTable;
use crate::sampler::{RasterServiceConfig, RetryPolicy, SamplerConfig};
use crate::scale::{ScaleCatalog, ScaleName};
use crate::types::GradingResult;
use crate::DEFAULT_RETAINED_RUNS;
use serde::{Deserialize, Serialize};
use sitegrade_common::config::{read_toml_config, resolve_config_file, LoggingConfig};
use sitegrade_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5790;
/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SITEGRADE_CONFIG";
/// Config file name under the user config directory
pub const CONFIG_FILE_NAME: &str = "grader.toml";
/// Raster service URL override
pub const RASTER_URL_ENV_VAR: &str = "SITEGRADE_RASTER_URL";
/// Raster service API key override
pub const RASTER_API_KEY_ENV_VAR: &str = "SITEGRADE_RASTER_API_KEY";

/// Complete grader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// HTTP server port
    pub port: u16,
    pub logging: LoggingConfig,
    pub raster: RasterServiceConfig,
    pub grading: GradingSettings,
    pub scales: ScaleCatalog,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            logging: LoggingConfig::default(),
            raster: RasterServiceConfig::default(),
            grading: GradingSettings::default(),
            scales: ScaleCatalog::default(),
        }
    }
}

/// `[grading]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    /// Concurrent grading tasks (clamped to 1..=32)
    pub concurrency: usize,
    /// Concurrent cell reads per area sample
    pub cell_concurrency: usize,
    /// Timeout per cell or point read
    pub cell_timeout_ms: u64,
    /// Default scale ceiling for runs that do not choose one
    pub scale_ceiling: ScaleName,
    pub reconciliation: ScaleReconciliation,
    /// Layer catalog replacing the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub costs: NominalCosts,
    /// Finished runs kept for status queries before the oldest are dropped
    pub retained_runs: usize,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            concurrency: 6,
            cell_concurrency: 16,
            cell_timeout_ms: 3_000,
            scale_ceiling: ScaleName::Detailed,
            reconciliation: ScaleReconciliation::default(),
            policy_file: None,
            retry: RetryPolicy::default(),
            costs: NominalCosts::default(),
            retained_runs: DEFAULT_RETAINED_RUNS,
        }
    }
}

impl GraderConfig {
    /// Locate, read, override from the environment and validate
    ///
    /// Falls back to defaults when no file is found. A file named on the
    /// command line or in `SITEGRADE_CONFIG` must exist.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_file(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        read_toml_config(path)
    }

    /// Apply raster URL and API key from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(RASTER_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                info!(env = RASTER_URL_ENV_VAR, "Raster base URL overridden from environment");
                self.raster.base_url = url.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var(RASTER_API_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                info!(env = RASTER_API_KEY_ENV_VAR, "Raster API key loaded from environment");
                self.raster.api_key = Some(key.trim().to_string());
            }
        }
    }

    /// Reject values the grader cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.raster.base_url.trim().is_empty() {
            return Err(Error::Config("raster.base_url must not be empty".to_string()));
        }
        if self.raster.rate_limit_per_second == 0 {
            return Err(Error::Config("raster.rate_limit_per_second must be > 0".to_string()));
        }
        if self.raster.request_timeout_ms == 0 {
            return Err(Error::Config("raster.request_timeout_ms must be > 0".to_string()));
        }
        if self.grading.cell_concurrency == 0 {
            return Err(Error::Config("grading.cell_concurrency must be > 0".to_string()));
        }
        if self.grading.retained_runs == 0 {
            return Err(Error::Config("grading.retained_runs must be > 0".to_string()));
        }
        if self.grading.cell_timeout_ms == 0 {
            return Err(Error::Config("grading.cell_timeout_ms must be > 0".to_string()));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.grading.concurrency) {
            warn!(
                configured = self.grading.concurrency,
                "grading.concurrency outside 1..={}, will be clamped", MAX_CONCURRENCY
            );
        }
        self.scales
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            cell_timeout: Duration::from_millis(self.grading.cell_timeout_ms),
            cell_concurrency: self.grading.cell_concurrency,
            retry: self.grading.retry.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.grading.concurrency,
            reconciliation: self.grading.reconciliation,
            costs: self.grading.costs.clone(),
        }
    }

    /// Configured catalog file, or the built-in catalog
    pub fn load_policy_table(&self) -> GradingResult<PolicyTable> {
        match &self.grading.policy_file {
            Some(path) => PolicyTable::load(path),
            None => PolicyTable::builtin(),
        }
    }
}
