//! Layered application configuration.
//!
//! Settings are read from YAML files: `base.yaml` then `<profile>.yaml` from
//! each configured directory, deep-merged in order so later files override
//! earlier ones key by key. Unknown keys are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid config values: {0}")]
    Invalid(serde_yaml::Error),
}

/// Application settings shared by the runner and its front-ends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for reports and run logs.
    pub output_dir: PathBuf,
    /// Write a per-run log file next to the report.
    pub log_to_file: bool,
    /// Mirror log lines to the console.
    pub log_to_console: bool,
    /// Render the sequence report after each run.
    pub report_enabled: bool,
    /// Socket path the event bus binds to.
    pub event_socket_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            output_dir: temp.clone(),
            log_to_file: false,
            log_to_console: true,
            report_enabled: false,
            event_socket_path: temp.join("benderr_events.sock"),
        }
    }
}

impl AppConfig {
    /// Load config for `profile`, merging `base.yaml` then `<profile>.yaml`
    /// from each directory in order. Missing files are skipped.
    pub fn load(profile: &str, config_dirs: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        let filenames = ["base.yaml".to_string(), format!("{profile}.yaml")];

        for dir in config_dirs {
            for filename in &filenames {
                let path = dir.join(filename);
                if !path.exists() {
                    continue;
                }
                let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let value: serde_yaml::Value =
                    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                        path: path.clone(),
                        source,
                    })?;
                merge(&mut merged, value);
            }
        }

        serde_yaml::from_value(merged).map_err(ConfigError::Invalid)
    }

    /// Load with the default `./config` directory.
    pub fn load_default(profile: &str) -> Result<Self, ConfigError> {
        Self::load(profile, &[PathBuf::from("./config")])
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.event_socket_path = path.as_ref().to_path_buf();
        self
    }
}

/// Recursively merge `src` into `dest`; non-mapping values replace.
fn merge(dest: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dest, src) {
        (serde_yaml::Value::Mapping(dest_map), serde_yaml::Value::Mapping(src_map)) => {
            for (key, value) in src_map {
                match dest_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        dest_map.insert(key, value);
                    }
                }
            }
        }
        (dest, src) => *dest = src,
    }
}
