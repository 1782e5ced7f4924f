//! Configuration loading for the xrtally telemetry SDK.
//!
//! Kept dependency-light so any host application can link it without
//! pulling in the SDK's async stack.
//!
//! # Sections
//!
//! - **Collector** (`NetworkConfig`, `DeviceConfig`, `TelemetryConfig`): where
//!   batches are sent, how the device identifies itself, and how the host logs.
//! - **Capture** (`BatchingConfig`, `SceneEntry`): per-stream flush thresholds
//!   and the scenes an application may select.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tallyconf::TallyConfig;
//!
//! let config = TallyConfig::load().expect("Failed to load config");
//! println!("collector: {}", config.network.base_url());
//! for scene in &config.scenes {
//!     println!("scene {} -> {} v{}", scene.name, scene.id, scene.version);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/xrtally/config.toml` (system)
//! 2. `~/.config/xrtally/config.toml` (user)
//! 3. `./xrtally.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`XRTALLY_*`)
//!
//! # Example Config
//!
//! ```toml
//! [network]
//! host = "collector.example.net"
//! version = 0
//! api_key = "..."
//!
//! [batching]
//! gaze_batch_size = 64
//! event_batch_size = 64
//!
//! [device]
//! hmd_type = "quest3"
//!
//! [[scenes]]
//! name = "Lobby"
//! id = "9a1c0b2e"
//! version = "3"
//! ```

pub mod capture;
pub mod collector;
pub mod loader;

pub use capture::{BatchingConfig, SceneEntry};
pub use collector::{DeviceConfig, NetworkConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete SDK configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TallyConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

impl TallyConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/xrtally/config.toml`
    /// 3. `~/.config/xrtally/config.toml`
    /// 4. `./xrtally.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of `./xrtally.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = TallyConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject settings the SDK cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("gaze_batch_size", self.batching.gaze_batch_size),
            ("event_batch_size", self.batching.event_batch_size),
            ("sensor_data_limit", self.batching.sensor_data_limit),
            ("dynamic_data_limit", self.batching.dynamic_data_limit),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "batching.{} must be at least 1",
                    name
                )));
            }
        }
        if self.network.host.is_empty() {
            return Err(ConfigError::Invalid("network.host is empty".to_string()));
        }
        Ok(())
    }

    /// Look up a configured scene by name.
    pub fn find_scene(&self, name: &str) -> Option<&SceneEntry> {
        self.scenes.iter().find(|s| s.name == name)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so the output keeps section order and reads like the docs.
        let mut output = String::new();

        output.push_str("# xrtally configuration\n\n");

        output.push_str("[network]\n");
        output.push_str(&format!("scheme = {}\n", quoted(&self.network.scheme)));
        output.push_str(&format!("host = {}\n", quoted(&self.network.host)));
        output.push_str(&format!("version = {}\n", self.network.version));
        let key = if self.network.api_key.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        output.push_str(&format!("api_key = {}\n", quoted(key)));

        output.push_str("\n[batching]\n");
        output.push_str(&format!(
            "gaze_batch_size = {}\n",
            self.batching.gaze_batch_size
        ));
        output.push_str(&format!(
            "event_batch_size = {}\n",
            self.batching.event_batch_size
        ));
        output.push_str(&format!(
            "sensor_data_limit = {}\n",
            self.batching.sensor_data_limit
        ));
        output.push_str(&format!(
            "dynamic_data_limit = {}\n",
            self.batching.dynamic_data_limit
        ));
        output.push_str(&format!(
            "gaze_interval = {:?}\n",
            self.batching.gaze_interval
        ));

        output.push_str("\n[device]\n");
        output.push_str(&format!("hmd_type = {}\n", quoted(&self.device.hmd_type)));
        if let Some(device_id) = &self.device.device_id {
            output.push_str(&format!("device_id = {}\n", quoted(device_id)));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = {}\n",
            quoted(&self.telemetry.log_level)
        ));
        output.push_str(&format!(
            "otlp_endpoint = {}\n",
            quoted(&self.telemetry.otlp_endpoint)
        ));

        for scene in &self.scenes {
            output.push_str("\n[[scenes]]\n");
            output.push_str(&format!("name = {}\n", quoted(&scene.name)));
            output.push_str(&format!("id = {}\n", quoted(&scene.id)));
            output.push_str(&format!("version = {}\n", quoted(&scene.version)));
        }

        output
    }
}

/// TOML basic string with quotes and backslashes escaped.
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
