use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::logs::writer::{DEFAULT_MAX_BYTES, DEFAULT_MAX_FILES};

const MIN_LOG_MAX_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub include_children: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval_ms: 2000,
            include_children: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub dir: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        LogsConfig {
            dir: default_logs_dir(),
            max_bytes: DEFAULT_MAX_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl LogsConfig {
    /// Per-file limit, never below 1 MiB.
    pub fn effective_max_bytes(&self) -> u64 {
        self.max_bytes.max(MIN_LOG_MAX_BYTES)
    }

    pub fn instance_log_path(&self, instance: &str) -> PathBuf {
        self.dir.join(format!("{instance}.log"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("instwatch").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("instwatch").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Config::default(),
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "invalid config, using defaults");
            Config::default()
        }
    }
}
