//! Configuration file parsing and management.
//!
//! This module handles loading executor settings from TOML files and
//! `BATCH_EXEC_*` environment variables, and merging them with proper
//! precedence rules (environment > local file > global file > XDG file >
//! built-in defaults).

use crate::error::BatchExecError;
use crate::types::{ExecutorConfig, MAX_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [executor]
/// max_concurrency = 16
/// stop_on_escalation = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Executor settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorFileConfig>,
}

/// The `[executor]` table. Every field is optional so files can be layered.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutorFileConfig {
    /// Explicit concurrency bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Multiple of available cores, used when no explicit bound is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_multiplier: Option<usize>,

    /// Halt dispatch after the first escalation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_on_escalation: Option<bool>,
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if reading, parsing, or
    /// validation fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, BatchExecError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BatchExecError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            BatchExecError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        if self.verbose {
            tracing::info!(path = %path.display(), "loaded configuration file");
        }

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// Files that are missing are skipped; files that exist but fail to
    /// parse or validate are reported at `warn` and skipped.
    pub fn discover_and_load(&self) -> FileConfig {
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        self.load_layers(candidates.into_iter().flatten())
    }

    /// Load and merge files from lowest to highest precedence.
    ///
    /// A file that cannot be loaded is logged and contributes nothing.
    pub fn load_layers<P, L>(&self, paths: L) -> FileConfig
    where
        P: AsRef<Path>,
        L: IntoIterator<Item = P>,
    {
        let mut merged_config = FileConfig::default();
        for path in paths {
            let path = path.as_ref();
            match self.load_file(path) {
                Ok(config) => merged_config = self.merge_configs(merged_config, config),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring configuration file");
                }
            }
        }

        merged_config
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./batch-exec.toml", "./.batch-exec.toml"];

        candidates
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".batch-exec.toml", "batch-exec.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("batch-exec").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            executor: match (lower.executor, higher.executor) {
                (Some(mut lower_exec), Some(higher_exec)) => {
                    if higher_exec.max_concurrency.is_some() {
                        lower_exec.max_concurrency = higher_exec.max_concurrency;
                    }
                    if higher_exec.concurrency_multiplier.is_some() {
                        lower_exec.concurrency_multiplier = higher_exec.concurrency_multiplier;
                    }
                    if higher_exec.stop_on_escalation.is_some() {
                        lower_exec.stop_on_escalation = higher_exec.stop_on_escalation;
                    }
                    Some(lower_exec)
                }
                (None, Some(higher_exec)) => Some(higher_exec),
                (Some(lower_exec), None) => Some(lower_exec),
                (None, None) => None,
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), BatchExecError> {
        let Some(executor) = &config.executor else {
            return Ok(());
        };

        if let Some(concurrency) = executor.max_concurrency {
            if concurrency == 0 || concurrency > MAX_CONCURRENCY {
                return Err(BatchExecError::config(format!(
                    "max_concurrency must be between 1 and {}",
                    MAX_CONCURRENCY
                )));
            }
        }

        if let Some(multiplier) = executor.concurrency_multiplier {
            if multiplier == 0 {
                return Err(BatchExecError::config(
                    "concurrency_multiplier must be at least 1",
                ));
            }
        }

        Ok(())
    }
}

/// Environment variable configuration.
///
/// Mirrors the `[executor]` table through `BATCH_EXEC_*` variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub max_concurrency: Option<usize>,
    pub concurrency_multiplier: Option<usize>,
    pub stop_on_escalation: Option<bool>,
}

/// Load configuration from the process environment.
///
/// Invalid values are logged at `warn` and ignored.
pub fn load_env_config() -> EnvConfig {
    env_config_from(|key| env::var(key).ok())
}

/// Build an [`EnvConfig`] from an arbitrary variable lookup.
pub fn env_config_from<L>(lookup: L) -> EnvConfig
where
    L: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    // BATCH_EXEC_CONCURRENCY - explicit concurrency bound
    if let Some(val) = lookup("BATCH_EXEC_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(concurrency) if concurrency > 0 && concurrency <= MAX_CONCURRENCY => {
                env_config.max_concurrency = Some(concurrency);
            }
            _ => tracing::warn!(
                value = %val,
                "invalid BATCH_EXEC_CONCURRENCY, must be 1-{}",
                MAX_CONCURRENCY
            ),
        }
    }

    // BATCH_EXEC_MULTIPLIER - cores multiplier
    if let Some(val) = lookup("BATCH_EXEC_MULTIPLIER") {
        match val.trim().parse::<usize>() {
            Ok(multiplier) if multiplier > 0 => {
                env_config.concurrency_multiplier = Some(multiplier);
            }
            _ => tracing::warn!(value = %val, "invalid BATCH_EXEC_MULTIPLIER, must be >= 1"),
        }
    }

    // BATCH_EXEC_STOP_ON_ESCALATION - halt dispatch after escalation
    if let Some(val) = lookup("BATCH_EXEC_STOP_ON_ESCALATION") {
        match parse_bool(&val) {
            Some(enabled) => env_config.stop_on_escalation = Some(enabled),
            None => tracing::warn!(
                value = %val,
                "invalid BATCH_EXEC_STOP_ON_ESCALATION, use true/false"
            ),
        }
    }

    env_config
}

/// Combine file and environment settings into an effective configuration.
///
/// An explicit concurrency bound beats a multiplier from the same or a
/// lower layer; environment values beat file values.
pub fn resolve_config(file: &FileConfig, env_config: &EnvConfig) -> ExecutorConfig {
    let file_exec = file.executor.clone().unwrap_or_default();
    let mut config = ExecutorConfig::default();

    let multiplier = env_config
        .concurrency_multiplier
        .or(file_exec.concurrency_multiplier);
    if let Some(multiplier) = multiplier {
        config = config.with_multiplier(multiplier);
    }

    let explicit = match (env_config.max_concurrency, env_config.concurrency_multiplier) {
        (Some(concurrency), _) => Some(concurrency),
        // An env multiplier overrides a file-level explicit bound.
        (None, Some(_)) => None,
        (None, None) => file_exec.max_concurrency,
    };
    if let Some(concurrency) = explicit {
        config = config.with_concurrency(concurrency);
    }

    if let Some(enabled) = env_config.stop_on_escalation.or(file_exec.stop_on_escalation) {
        config = config.with_stop_on_escalation(enabled);
    }

    config
}

/// Parse the usual spellings of a boolean flag.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
