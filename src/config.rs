use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::handlers::WaitSettings;
use crate::world::InteractionFramework;

/// Project-local config file, picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "stepwise.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interaction framework reported to handler dispatch
    #[serde(default)]
    pub framework: InteractionFramework,
    /// How often a sub-state wait re-checks the world (default: 100ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait time before a sub-state wait warns and restarts (default: 10s)
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Simulated frame length used by `simulate` (default: 100ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_tick_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            framework: InteractionFramework::default(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl EngineConfig {
    pub fn wait_settings(&self) -> WaitSettings {
        WaitSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: Duration::from_millis(self.wait_timeout_ms.max(1)),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to a timestamped file under `paths.logs` instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_logs_path")]
    pub logs: String,
}

fn default_logs_path() -> String {
    ".stepwise/logs".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs: default_logs_path(),
        }
    }
}

impl Config {
    /// Load configuration, later sources overriding earlier ones:
    /// embedded defaults, `./stepwise.toml`, the user config directory,
    /// an explicit file, then `STEPWISE__SECTION__KEY` variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            builder = builder.add_source(config::File::from(local_config));
        }

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("STEPWISE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// `~/.config/stepwise/config.toml` (platform equivalent)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stepwise").join("config.toml"))
    }

    /// Write this configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, toml_str)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Absolute path to the logs directory
    pub fn logs_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.paths.logs);
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.framework, InteractionFramework::XrToolkit);
        assert_eq!(
            config.engine.wait_settings(),
            WaitSettings {
                poll_interval: Duration::from_millis(100),
                timeout: Duration::from_secs(10),
            }
        );
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.to_file);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            framework = "physics_hands"
            wait_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.framework, InteractionFramework::PhysicsHands);
        assert_eq!(config.engine.wait_timeout_ms, 2500);
        assert_eq!(config.engine.poll_interval_ms, 100);
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");

        let mut config = Config::default();
        config.engine.tick_ms = 20;
        config.engine.framework = InteractionFramework::Desktop;
        config.save(&path).unwrap();

        let loaded = Config::load(path.to_str()).unwrap();
        assert_eq!(loaded.engine.tick_ms, 20);
        assert_eq!(loaded.engine.framework, InteractionFramework::Desktop);
        assert_eq!(loaded.engine.tick(), Duration::from_millis(20));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let engine = EngineConfig {
            poll_interval_ms: 0,
            tick_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(engine.wait_settings().poll_interval, Duration::from_millis(1));
        assert_eq!(engine.tick(), Duration::from_millis(1));
    }
}
