//! Dynamic objects: identity manifest, transform snapshots and engagements.
//!
//! Registration and snapshots share one flush threshold counted over
//! `snapshots + pending manifest entries`. A dispatch clears the pending
//! manifest and the snapshots; the full manifest and object ids persist until
//! the session ends so a scene change can replay them.

pub mod engagement;
pub mod types;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::context::{now_secs, Properties, SceneRef, SessionContext, FORMAT_VERSION};
use crate::dispatch::{
    self, BatchRecord, BatchState, Dispatch, Dispatcher, SkipReason, Staged, StreamKind,
};
use crate::error::TallyError;
use crate::gateway::Gateway;

pub use engagement::{EngagementBook, EngagementEvent, EngagementSummary};
pub use types::{
    DynamicObjectId, ManifestEntry, Snapshot, TrackedObject, TrackingThresholds, DEFAULT_FILE_TYPE,
};

#[derive(Debug)]
struct RegistryState {
    object_ids: Vec<DynamicObjectId>,
    manifest_entries: Vec<ManifestEntry>,
    full_manifest: Vec<ManifestEntry>,
    snapshots: Vec<Snapshot>,
    engagements: EngagementBook,
    tracked: HashMap<String, TrackedObject>,
    part: u32,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            object_ids: Vec::new(),
            manifest_entries: Vec::new(),
            full_manifest: Vec::new(),
            snapshots: Vec::new(),
            engagements: EngagementBook::new(),
            tracked: HashMap::new(),
            part: 1,
        }
    }

    fn pending(&self) -> usize {
        self.snapshots.len() + self.manifest_entries.len()
    }

    fn knows(&self, object_id: &str) -> bool {
        self.object_ids.iter().any(|o| o.id == object_id)
    }

    /// Build and queue a snapshot, folding in the object's engagements.
    fn push_snapshot(
        &mut self,
        object_id: &str,
        position: [f64; 3],
        rotation: [f64; 4],
        scale: Option<[f64; 3]>,
        properties: Option<Properties>,
    ) {
        let now = now_secs();
        let engagements = if self.engagements.has_history(object_id) {
            self.engagements.summarize_and_prune(object_id, now)
        } else {
            Vec::new()
        };

        self.snapshots.push(Snapshot {
            id: object_id.to_string(),
            time: now,
            position,
            rotation,
            scale,
            properties: properties.into_iter().filter(|p| !p.is_empty()).collect(),
            engagements,
        });
    }
}

pub struct DynamicObjectRegistry {
    context: Arc<SessionContext>,
    dispatcher: Dispatcher,
    limit: usize,
    state: Mutex<RegistryState>,
}

impl DynamicObjectRegistry {
    pub(crate) fn new(context: Arc<SessionContext>, gateway: Arc<dyn Gateway>, limit: usize) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(StreamKind::Dynamics, gateway),
            limit,
            state: Mutex::new(RegistryState::new()),
        }
    }

    /// Register an object under a fresh random id. Returns the id.
    pub fn register_object(
        &self,
        name: &str,
        mesh_name: &str,
        position: [f64; 3],
        rotation: [f64; 4],
        file_type: Option<&str>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.register(id, name, mesh_name, position, rotation, file_type)
    }

    /// Register an object under a caller-chosen id. Duplicates are logged and
    /// reuse the existing identity.
    pub fn register_object_custom_id(
        &self,
        name: &str,
        mesh_name: &str,
        custom_id: &str,
        position: [f64; 3],
        rotation: [f64; 4],
        file_type: Option<&str>,
    ) -> String {
        self.register(
            custom_id.to_string(),
            name,
            mesh_name,
            position,
            rotation,
            file_type,
        )
    }

    fn register(
        &self,
        id: String,
        name: &str,
        mesh_name: &str,
        position: [f64; 3],
        rotation: [f64; 4],
        file_type: Option<&str>,
    ) -> String {
        let full = {
            let mut state = self.state.lock();

            match state.object_ids.iter_mut().find(|o| o.id == id) {
                Some(existing) => {
                    warn!(object_id = %id, "object id already registered");
                    existing.used = true;
                }
                None => state.object_ids.push(DynamicObjectId {
                    id: id.clone(),
                    used: true,
                    mesh_name: mesh_name.to_string(),
                }),
            }

            let entry = ManifestEntry {
                id: id.clone(),
                name: name.to_string(),
                mesh: mesh_name.to_string(),
                file_type: file_type.unwrap_or(DEFAULT_FILE_TYPE).to_string(),
            };
            state.manifest_entries.push(entry.clone());
            state.full_manifest.push(entry);

            state.push_snapshot(
                &id,
                position,
                rotation,
                None,
                Some(Properties::new().with("enabled", true)),
            );
            debug!(object_id = %id, name, "registered dynamic object");
            state.pending() >= self.limit
        };

        self.flush_if(full);
        id
    }

    /// Queue a transform sample. Unknown ids are logged but still recorded.
    pub fn add_snapshot(
        &self,
        object_id: &str,
        position: [f64; 3],
        rotation: [f64; 4],
        scale: Option<[f64; 3]>,
        properties: Option<Properties>,
    ) {
        let full = {
            let mut state = self.state.lock();
            if !state.knows(object_id) {
                warn!(object_id, "snapshot for unregistered object");
            }
            state.push_snapshot(object_id, position, rotation, scale, properties);
            state.pending() >= self.limit
        };
        self.flush_if(full);
    }

    fn flush_if(&self, full: bool) {
        if full {
            dispatch::auto_flush(StreamKind::Dynamics, &self.dispatcher, || self.prepare());
        }
    }

    /// Remember the engine handle for an object.
    pub fn track_object(
        &self,
        object_id: &str,
        handle: Arc<dyn Any + Send + Sync>,
        thresholds: TrackingThresholds,
    ) {
        self.state
            .lock()
            .tracked
            .insert(object_id.to_string(), TrackedObject { handle, thresholds });
    }

    pub fn tracked(&self, object_id: &str) -> Option<TrackedObject> {
        self.state.lock().tracked.get(object_id).cloned()
    }

    pub fn untrack(&self, object_id: &str) -> Option<TrackedObject> {
        self.state.lock().tracked.remove(object_id)
    }

    /// Open an engagement. Returns its occurrence number for this object and name.
    pub fn begin_engagement(&self, object_id: &str, name: &str, parent_id: Option<&str>) -> u32 {
        self.state
            .lock()
            .engagements
            .begin(object_id, name, parent_id, now_secs())
    }

    pub fn end_engagement(&self, object_id: &str, name: &str, parent_id: Option<&str>) {
        self.state
            .lock()
            .engagements
            .end(object_id, name, parent_id, now_secs());
    }

    pub fn end_active_engagements(&self, object_id: &str) -> usize {
        self.state.lock().engagements.end_all(object_id, now_secs())
    }

    /// End engagements, queue a final disabling snapshot and mark the id unused.
    pub fn remove_object(&self, object_id: &str, position: [f64; 3], rotation: [f64; 4]) {
        let full = {
            let mut state = self.state.lock();
            state.engagements.end_all(object_id, now_secs());
            state.push_snapshot(
                object_id,
                position,
                rotation,
                None,
                Some(Properties::new().with("enabled", false)),
            );
            match state.object_ids.iter_mut().find(|o| o.id == object_id) {
                Some(existing) => existing.used = false,
                None => warn!(object_id, "removing unregistered object"),
            }
            state.tracked.remove(object_id);
            state.pending() >= self.limit
        };
        self.flush_if(full);
    }

    /// Re-queue every object ever registered this session.
    pub fn refresh_object_manifest(&self) {
        let mut state = self.state.lock();
        let mut seen = HashSet::new();
        let entries: Vec<ManifestEntry> = state
            .full_manifest
            .iter()
            .filter(|e| seen.insert(e.id.clone()))
            .cloned()
            .collect();
        debug!(objects = entries.len(), "manifest refreshed");
        state.manifest_entries = entries;
    }

    pub async fn send_data(&self) -> Result<Dispatch, TallyError> {
        let staged = self.prepare()?;
        self.dispatcher.complete(staged).await
    }

    pub(crate) fn prepare(&self) -> Result<Staged, TallyError> {
        let scene = self.context.scene();
        if !scene.is_selected() {
            return Err(TallyError::NoSceneSelected);
        }
        Ok(self.stage_for(scene))
    }

    /// Stage against a scene the caller has already checked.
    pub(crate) fn stage_for(&self, scene: SceneRef) -> Staged {
        if !self.context.is_active() {
            return Staged::Skipped(SkipReason::SessionInactive);
        }

        let mut state = self.state.lock();
        if state.pending() == 0 {
            return Staged::Skipped(SkipReason::NothingToSend);
        }

        let part = state.part;
        state.part += 1;
        let entries = std::mem::take(&mut state.manifest_entries);
        let snapshots = std::mem::take(&mut state.snapshots);
        let records = entries.len() + snapshots.len();

        let manifest: Map<String, Value> = entries
            .into_iter()
            .map(|e| {
                (
                    e.id,
                    json!({"name": e.name, "mesh": e.mesh, "fileType": e.file_type}),
                )
            })
            .collect();

        let body = json!({
            "userid": self.context.participant_id(),
            "timestamp": self.context.session_timestamp(),
            "sessionid": self.context.session_id(),
            "part": part,
            "formatversion": FORMAT_VERSION,
            "manifest": manifest,
            "data": snapshots,
        });
        self.dispatcher.stage(part, scene, records, body)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn end_session(&self) {
        *self.state.lock() = RegistryState::new();
        self.dispatcher.reset();
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.lock().snapshots.clone()
    }

    pub fn manifest_entries(&self) -> Vec<ManifestEntry> {
        self.state.lock().manifest_entries.clone()
    }

    pub fn full_manifest(&self) -> Vec<ManifestEntry> {
        self.state.lock().full_manifest.clone()
    }

    pub fn object_ids(&self) -> Vec<DynamicObjectId> {
        self.state.lock().object_ids.clone()
    }

    pub fn active_engagements(&self, object_id: &str) -> Vec<EngagementEvent> {
        self.state.lock().engagements.active(object_id)
    }

    pub fn all_engagements(&self, object_id: &str) -> Vec<EngagementEvent> {
        self.state.lock().engagements.all(object_id)
    }

    pub fn engagement_count(&self, object_id: &str, name: &str) -> u32 {
        self.state.lock().engagements.count(object_id, name)
    }

    pub fn part(&self) -> u32 {
        self.state.lock().part
    }

    pub fn batch_history(&self) -> Vec<BatchRecord> {
        self.dispatcher.history()
    }

    pub fn batch_state(&self, part: u32) -> Option<BatchState> {
        self.dispatcher.batch_state(part)
    }
}
