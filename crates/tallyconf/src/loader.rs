//! Config file discovery, loading, and environment variable overlay.

use crate::{
    BatchingConfig, ConfigError, DeviceConfig, NetworkConfig, TallyConfig, TelemetryConfig,
};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only existing files are returned.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/xrtally/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("xrtally/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("xrtally.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<TallyConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string. Missing sections fall back to defaults.
pub fn parse_toml(contents: &str, path: &Path) -> Result<TallyConfig, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Keep `overlay` when it was changed from the compiled default, else `base`.
fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence field by field.
pub fn merge_configs(base: TallyConfig, overlay: TallyConfig) -> TallyConfig {
    let net = NetworkConfig::default();
    let batch = BatchingConfig::default();
    let device = DeviceConfig::default();
    let telemetry = TelemetryConfig::default();

    TallyConfig {
        network: NetworkConfig {
            scheme: pick(base.network.scheme, overlay.network.scheme, net.scheme),
            host: pick(base.network.host, overlay.network.host, net.host),
            version: pick(base.network.version, overlay.network.version, net.version),
            api_key: pick(base.network.api_key, overlay.network.api_key, net.api_key),
        },
        batching: BatchingConfig {
            gaze_batch_size: pick(
                base.batching.gaze_batch_size,
                overlay.batching.gaze_batch_size,
                batch.gaze_batch_size,
            ),
            event_batch_size: pick(
                base.batching.event_batch_size,
                overlay.batching.event_batch_size,
                batch.event_batch_size,
            ),
            sensor_data_limit: pick(
                base.batching.sensor_data_limit,
                overlay.batching.sensor_data_limit,
                batch.sensor_data_limit,
            ),
            dynamic_data_limit: pick(
                base.batching.dynamic_data_limit,
                overlay.batching.dynamic_data_limit,
                batch.dynamic_data_limit,
            ),
            gaze_interval: pick(
                base.batching.gaze_interval,
                overlay.batching.gaze_interval,
                batch.gaze_interval,
            ),
        },
        device: DeviceConfig {
            hmd_type: pick(base.device.hmd_type, overlay.device.hmd_type, device.hmd_type),
            device_id: overlay.device.device_id.or(base.device.device_id),
        },
        telemetry: TelemetryConfig {
            log_level: pick(
                base.telemetry.log_level,
                overlay.telemetry.log_level,
                telemetry.log_level,
            ),
            otlp_endpoint: pick(
                base.telemetry.otlp_endpoint,
                overlay.telemetry.otlp_endpoint,
                telemetry.otlp_endpoint,
            ),
        },
        // Scene lists are not merged entry by entry; a non-empty overlay wins.
        scenes: if overlay.scenes.is_empty() {
            base.scenes
        } else {
            overlay.scenes
        },
    }
}

fn env_string(name: &str, target: &mut String, sources: &mut ConfigSources) {
    if let Ok(v) = env::var(name) {
        *target = v;
        sources.env_overrides.push(name.to_string());
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, target: &mut T, sources: &mut ConfigSources) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            *target = parsed;
            sources.env_overrides.push(name.to_string());
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TallyConfig, sources: &mut ConfigSources) {
    // Collector
    env_string("XRTALLY_API_KEY", &mut config.network.api_key, sources);
    env_string("XRTALLY_HOST", &mut config.network.host, sources);
    env_string("XRTALLY_SCHEME", &mut config.network.scheme, sources);
    env_parsed("XRTALLY_API_VERSION", &mut config.network.version, sources);
    env_string("XRTALLY_HMD_TYPE", &mut config.device.hmd_type, sources);

    // Thresholds
    env_parsed(
        "XRTALLY_GAZE_BATCH_SIZE",
        &mut config.batching.gaze_batch_size,
        sources,
    );
    env_parsed(
        "XRTALLY_EVENT_BATCH_SIZE",
        &mut config.batching.event_batch_size,
        sources,
    );
    env_parsed(
        "XRTALLY_SENSOR_DATA_LIMIT",
        &mut config.batching.sensor_data_limit,
        sources,
    );
    env_parsed(
        "XRTALLY_DYNAMIC_DATA_LIMIT",
        &mut config.batching.dynamic_data_limit,
        sources,
    );

    // Telemetry
    env_string("XRTALLY_LOG_LEVEL", &mut config.telemetry.log_level, sources);
    // Also support RUST_LOG
    env_string("RUST_LOG", &mut config.telemetry.log_level, sources);
    env_string(
        "XRTALLY_OTLP_ENDPOINT",
        &mut config.telemetry.otlp_endpoint,
        sources,
    );
    // Also support standard OTEL env var
    env_string(
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        &mut config.telemetry.otlp_endpoint,
        sources,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SceneEntry;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[network]
host = "collector.test"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.network.host, "collector.test");
        assert_eq!(config.network.scheme, "https");
        assert_eq!(config.batching.gaze_batch_size, 64);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[network]
scheme = "http"
host = "127.0.0.1:9999"
version = 2
api_key = "abc123"

[batching]
gaze_batch_size = 10
event_batch_size = 4
sensor_data_limit = 15
dynamic_data_limit = 32
gaze_interval = 0.25

[device]
hmd_type = "quest3"
device_id = "dev-42"

[telemetry]
log_level = "debug"

[[scenes]]
name = "Lobby"
id = "scene-a"
version = "1"

[[scenes]]
name = "Arena"
id = "scene-b"
version = "7"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.network.base_url(), "http://127.0.0.1:9999/v2");
        assert_eq!(config.network.api_key, "abc123");
        assert_eq!(config.batching.event_batch_size, 4);
        assert_eq!(config.batching.sensor_data_limit, 15);
        assert_eq!(config.batching.gaze_interval, 0.25);
        assert_eq!(config.device.device_id.as_deref(), Some("dev-42"));
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(
            config.scenes,
            vec![
                SceneEntry::new("Lobby", "scene-a", "1"),
                SceneEntry::new("Arena", "scene-b", "7"),
            ]
        );
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_toml("[network\nhost=", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_merge_overlay_wins_only_when_set() {
        let mut base = TallyConfig::default();
        base.network.host = "base.host".to_string();
        base.network.api_key = "base-key".to_string();
        base.scenes.push(SceneEntry::new("Lobby", "a", "1"));

        let mut overlay = TallyConfig::default();
        overlay.network.api_key = "overlay-key".to_string();
        overlay.batching.event_batch_size = 8;

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.network.host, "base.host");
        assert_eq!(merged.network.api_key, "overlay-key");
        assert_eq!(merged.batching.event_batch_size, 8);
        assert_eq!(merged.scenes.len(), 1);
    }

    #[test]
    fn test_merge_replaces_scene_list() {
        let mut base = TallyConfig::default();
        base.scenes.push(SceneEntry::new("Lobby", "a", "1"));
        let mut overlay = TallyConfig::default();
        overlay.scenes.push(SceneEntry::new("Arena", "b", "2"));

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.scenes, vec![SceneEntry::new("Arena", "b", "2")]);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[batching]\nevent_batch_size = 5\n\n[[scenes]]\nname = \"Lobby\"\nid = \"x\"\nversion = \"1\""
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.batching.event_batch_size, 5);
        assert_eq!(config.find_scene("Lobby").map(|s| s.id.as_str()), Some("x"));

        let files = discover_config_files_with_override(Some(&path));
        assert_eq!(files.last(), Some(&path));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_from_file(Path::new("/nonexistent/xrtally.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
