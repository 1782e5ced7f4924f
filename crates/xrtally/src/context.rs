//! Session and scene identity shared by every stream.
//!
//! One [`SessionContext`] is built per SDK instance and handed to each stream
//! by `Arc`. Only the session controller mutates the active flag and scene.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tallyconf::{SceneEntry, TallyConfig};
use tracing::debug;

/// Wire format version attached to every payload.
pub const FORMAT_VERSION: &str = "1.0";

/// Current wall clock as fractional Unix seconds.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Active scene identity. The all-empty value means "no scene selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRef {
    pub scene_name: String,
    pub scene_id: String,
    pub version_number: String,
}

impl SceneRef {
    /// The "no scene" sentinel.
    pub fn none() -> Self {
        Self::default()
    }

    /// Dispatch is only allowed when both id and version are present.
    pub fn is_selected(&self) -> bool {
        !self.scene_id.is_empty() && !self.version_number.is_empty()
    }
}

impl From<&SceneEntry> for SceneRef {
    fn from(entry: &SceneEntry) -> Self {
        Self {
            scene_name: entry.name.clone(),
            scene_id: entry.id.clone(),
            version_number: entry.version.clone(),
        }
    }
}

/// String-keyed property bag with a controlled insertion API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder form of [`Properties::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Debug)]
struct SessionState {
    user_id: Option<String>,
    device_id: String,
    session_id: Option<String>,
    session_timestamp: Option<i64>,
    active: bool,
    scene: SceneRef,
    /// Session properties not yet sent to the collector
    pending_properties: Properties,
}

/// Session identity, scene selection and the configured scene list.
#[derive(Debug)]
pub struct SessionContext {
    state: RwLock<SessionState>,
    scenes: Vec<SceneEntry>,
    hmd_type: String,
    gaze_interval: f64,
}

impl SessionContext {
    pub fn new(config: &TallyConfig) -> Self {
        let device_id = config
            .device
            .device_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            state: RwLock::new(SessionState {
                user_id: None,
                device_id,
                session_id: None,
                session_timestamp: None,
                active: false,
                scene: SceneRef::none(),
                pending_properties: Properties::new(),
            }),
            scenes: config.scenes.clone(),
            hmd_type: config.device.hmd_type.clone(),
            gaze_interval: config.batching.gaze_interval,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    /// Flip inactive -> active. Returns false if a session was already running.
    pub(crate) fn try_activate(&self) -> bool {
        let mut state = self.state.write();
        if state.active {
            return false;
        }
        state.active = true;
        true
    }

    /// Unix seconds of the first access since the last session end; cached.
    pub fn session_timestamp(&self) -> i64 {
        if let Some(ts) = self.state.read().session_timestamp {
            return ts;
        }
        let mut state = self.state.write();
        *state
            .session_timestamp
            .get_or_insert_with(|| chrono::Utc::now().timestamp())
    }

    /// `{timestamp}_{userId-or-deviceId}`, derived once and cached until session end.
    pub fn session_id(&self) -> String {
        if let Some(id) = self.state.read().session_id.clone() {
            return id;
        }
        let timestamp = self.session_timestamp();
        let mut state = self.state.write();
        let participant = state
            .user_id
            .clone()
            .unwrap_or_else(|| state.device_id.clone());
        state
            .session_id
            .get_or_insert_with(|| format!("{}_{}", timestamp, participant))
            .clone()
    }

    /// Id sent as `userid`: the user id when set, else the device id.
    pub fn participant_id(&self) -> String {
        let state = self.state.read();
        state
            .user_id
            .clone()
            .unwrap_or_else(|| state.device_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.read().user_id.clone()
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.state.write().user_id = Some(user_id.into());
    }

    pub fn device_id(&self) -> String {
        self.state.read().device_id.clone()
    }

    pub fn set_device_id(&self, device_id: impl Into<String>) {
        self.state.write().device_id = device_id.into();
    }

    pub fn hmd_type(&self) -> &str {
        &self.hmd_type
    }

    pub fn gaze_interval(&self) -> f64 {
        self.gaze_interval
    }

    pub fn scene(&self) -> SceneRef {
        self.state.read().scene.clone()
    }

    pub(crate) fn set_scene(&self, scene: SceneRef) {
        self.state.write().scene = scene;
    }

    /// Find a configured scene by name.
    pub fn resolve_scene(&self, name: &str) -> Option<SceneRef> {
        self.scenes
            .iter()
            .find(|s| s.name == name)
            .map(SceneRef::from)
    }

    /// Queue a session property for the next gaze batch.
    pub fn set_session_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.write().pending_properties.set(key, value);
    }

    pub fn pending_properties(&self) -> Properties {
        self.state.read().pending_properties.clone()
    }

    pub(crate) fn take_pending_properties(&self) -> Properties {
        std::mem::take(&mut self.state.write().pending_properties)
    }

    /// Drop session identity and pending properties. Scene and user/device ids survive.
    pub(crate) fn reset_session(&self) {
        let mut state = self.state.write();
        state.active = false;
        state.session_id = None;
        state.session_timestamp = None;
        state.pending_properties = Properties::new();
        debug!("session identity cleared");
    }
}
