//! Configuration file location and TOML helpers
//!
//! Configuration files are located by priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`~/.config/sitegrade/<file>`)
//! 4. System config directory (`/etc/sitegrade/<file>`, Linux only)
//!
//! If none exists the caller falls back to built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "sitegrade";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate a configuration file following the priority order above.
///
/// Returns `None` when no candidate exists; a CLI or ENV path is returned even
/// if missing so that the caller can report a precise error.
pub fn resolve_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: System config directory
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    debug!(file_name, "No configuration file found, using built-in defaults");
    None
}

/// Read and parse a TOML configuration file
pub fn read_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        port: u16,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        std::env::set_var("SITEGRADE_TEST_CONFIG", "/from/env.toml");
        let resolved = resolve_config_file(
            Some(Path::new("/from/cli.toml")),
            "SITEGRADE_TEST_CONFIG",
            "grader.toml",
        );
        std::env::remove_var("SITEGRADE_TEST_CONFIG");
        assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli() {
        std::env::set_var("SITEGRADE_TEST_CONFIG", "/from/env.toml");
        let resolved = resolve_config_file(None, "SITEGRADE_TEST_CONFIG", "grader.toml");
        std::env::remove_var("SITEGRADE_TEST_CONFIG");
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
    }

    #[test]
    fn test_read_applies_serde_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("grader.toml");
        std::fs::write(&path, "port = 5790\n").unwrap();

        let loaded: Sample = read_toml_config(&path).unwrap();
        assert_eq!(loaded.port, 5790);
        assert_eq!(loaded.logging, LoggingConfig::default());
    }

    #[test]
    fn test_read_logging_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("grader.toml");
        std::fs::write(&path, "port = 1\n[logging]\nlevel = \"debug\"\nfile = \"/tmp/grader.log\"\n").unwrap();

        let loaded: Sample = read_toml_config(&path).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.logging.file, Some(PathBuf::from("/tmp/grader.log")));
    }

    #[test]
    fn test_read_reports_parse_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        let result: Result<Sample> = read_toml_config(&path);
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result: Result<Sample> = read_toml_config(Path::new("/nonexistent/grader.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
