//! Collector-facing configuration - where batches go and how this process reports.

use serde::{Deserialize, Serialize};

/// Remote collector endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// URL scheme. Local collectors and test doubles usually speak plain http.
    /// Default: https
    #[serde(default = "NetworkConfig::default_scheme")]
    pub scheme: String,

    /// Collector host, optionally with a port.
    /// Default: localhost
    #[serde(default = "NetworkConfig::default_host")]
    pub host: String,

    /// API version segment, rendered as `/v{version}/`.
    /// Default: 0
    #[serde(default)]
    pub version: u32,

    /// Key sent as `Authorization: APIKEY:DATA {api_key}`.
    #[serde(default)]
    pub api_key: String,
}

impl NetworkConfig {
    fn default_scheme() -> String {
        "https".to_string()
    }

    fn default_host() -> String {
        "localhost".to_string()
    }

    /// Base URL shared by every endpoint, e.g. `https://host/v0`.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}/v{}",
            self.scheme,
            self.host.trim_end_matches('/'),
            self.version
        )
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            scheme: Self::default_scheme(),
            host: Self::default_host(),
            version: 0,
            api_key: String::new(),
        }
    }
}

/// Headset and device identity reported with gaze batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// HMD type string attached to gaze batches.
    /// Default: unknown
    #[serde(default = "DeviceConfig::default_hmd_type")]
    pub hmd_type: String,

    /// Stable device id. When unset the SDK generates one per process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl DeviceConfig {
    fn default_hmd_type() -> String {
        "unknown".to_string()
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hmd_type: Self::default_hmd_type(),
            device_id: None,
        }
    }
}

/// Diagnostics for the host process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error or a full EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Empty disables export and keeps console logging only.
    #[serde(default)]
    pub otlp_endpoint: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: String::new(),
        }
    }
}
