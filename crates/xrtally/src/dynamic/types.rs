use std::any::Any;
use std::sync::Arc;

use serde::Serialize;

use super::engagement::EngagementSummary;
use crate::context::Properties;

/// File type recorded for objects registered without one.
pub const DEFAULT_FILE_TYPE: &str = "gltf";

/// Identity of a registered object. Removal clears `used` but keeps the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicObjectId {
    pub id: String,
    pub used: bool,
    pub mesh_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub id: String,
    pub name: String,
    pub mesh: String,
    #[serde(rename = "fileType")]
    pub file_type: String,
}

/// One timestamped transform sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub time: f64,
    #[serde(rename = "p")]
    pub position: [f64; 3],
    #[serde(rename = "r")]
    pub rotation: [f64; 4],
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Properties>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub engagements: Vec<EngagementSummary>,
}

/// Change thresholds an engine adapter uses to decide when to snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingThresholds {
    pub position: f64,
    pub rotation: f64,
    pub scale: f64,
}

impl Default for TrackingThresholds {
    fn default() -> Self {
        Self {
            position: 0.01,
            rotation: 0.1,
            scale: 0.1,
        }
    }
}

/// Opaque engine handle registered for an object id. Stored, never inspected.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub handle: Arc<dyn Any + Send + Sync>,
    pub thresholds: TrackingThresholds,
}

impl TrackedObject {
    /// Recover the concrete handle type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.handle.clone().downcast::<T>().ok()
    }
}
