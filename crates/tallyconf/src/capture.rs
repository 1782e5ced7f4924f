//! Capture configuration - per-stream batch thresholds and the scene list.

use serde::{Deserialize, Serialize};

/// Flush thresholds for each stream.
///
/// A stream dispatches as soon as its buffered record count reaches its limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Gaze records per batch.
    /// Default: 64
    #[serde(default = "BatchingConfig::default_limit")]
    pub gaze_batch_size: usize,

    /// Custom events per batch.
    /// Default: 64
    #[serde(default = "BatchingConfig::default_limit")]
    pub event_batch_size: usize,

    /// Individual sensor readings per batch (across all metric names).
    /// Default: 64
    #[serde(default = "BatchingConfig::default_limit")]
    pub sensor_data_limit: usize,

    /// Snapshots plus pending manifest entries per dynamics batch.
    /// Default: 64
    #[serde(default = "BatchingConfig::default_limit")]
    pub dynamic_data_limit: usize,

    /// Gaze sampling interval in seconds, reported with gaze batches.
    /// Default: 0.1
    #[serde(default = "BatchingConfig::default_gaze_interval")]
    pub gaze_interval: f64,
}

impl BatchingConfig {
    fn default_limit() -> usize {
        64
    }

    fn default_gaze_interval() -> f64 {
        0.1
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            gaze_batch_size: Self::default_limit(),
            event_batch_size: Self::default_limit(),
            sensor_data_limit: Self::default_limit(),
            dynamic_data_limit: Self::default_limit(),
            gaze_interval: Self::default_gaze_interval(),
        }
    }
}

/// One configured scene: the destination dataset on the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneEntry {
    /// Name the application selects the scene by.
    pub name: String,
    /// Collector-side scene id.
    pub id: String,
    /// Collector-side scene version.
    pub version: String,
}

impl SceneEntry {
    pub fn new(name: impl Into<String>, id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            version: version.into(),
        }
    }
}
