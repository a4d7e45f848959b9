//! Configuration
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. `KILN_ROOT_PATH` in the environment overrides the asset root
//! read from a file.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming the directory model assets live in.
pub const ROOT_PATH_ENV: &str = "KILN_ROOT_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Controller-side settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Overrides the inferred directory for model assets
    #[serde(default)]
    pub root_path: Option<PathBuf>,

    /// Dimensions of one sample, sent with every `load-model`
    #[serde(default)]
    pub input_shape: Vec<usize>,

    /// How long control commands wait for an answer; `None` waits forever
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: Option<u64>,
}

fn default_command_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            root_path: None,
            input_shape: Vec::new(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    /// Resolves the asset root: an explicit override, then `root_path`, then
    /// [`ROOT_PATH_ENV`], then the current directory.
    pub fn resolve_root(&self, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.root_path.clone())
            .or_else(|| std::env::var_os(ROOT_PATH_ENV).map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Arguments to [`Controller::setup_worker`](crate::controller::Controller::setup_worker).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfig {
    /// Takes precedence over every other source of the asset root
    #[serde(default)]
    pub root_path: Option<PathBuf>,
}

/// Settings for the isolated run executor.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Pause at every checkpoint so queued control messages can land
    #[serde(default = "default_yield_interval_ms")]
    pub yield_interval_ms: u64,
}

fn default_yield_interval_ms() -> u64 {
    1
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            yield_interval_ms: default_yield_interval_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }
}

impl KilnConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}

/// Loads configuration from a TOML file, then applies environment overrides.
pub fn load_config(path: &Path) -> Result<KilnConfig, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = KilnConfig::from_toml(&source)?;

    if let Some(root) = std::env::var_os(ROOT_PATH_ENV) {
        config.controller.root_path = Some(PathBuf::from(root));
    }

    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}
