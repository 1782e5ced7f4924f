//! Head pose samples with an optional gaze hit.
//!
//! Gaze batches also carry the device's HMD type, the sampling interval and
//! any session properties set since the previous gaze batch.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::BatchBuffer;
use crate::context::{now_secs, SceneRef, SessionContext, FORMAT_VERSION};
use crate::dispatch::{
    self, BatchRecord, BatchState, Dispatch, Dispatcher, SkipReason, Staged, StreamKind,
};
use crate::error::TallyError;
use crate::gateway::Gateway;

/// What the gaze ray hit, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum GazeHit {
    /// Hit on a dynamic object; `point` is in the object's local space
    Object { object_id: String, point: [f64; 3] },
    /// Hit on static world geometry
    World { point: [f64; 3] },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GazeRecord {
    pub time: f64,
    #[serde(rename = "p")]
    pub position: [f64; 3],
    #[serde(rename = "r")]
    pub rotation: [f64; 4],
    #[serde(rename = "g", skip_serializing_if = "Option::is_none")]
    pub hit_point: Option<[f64; 3]>,
    #[serde(rename = "o", skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl GazeRecord {
    fn new(position: [f64; 3], rotation: [f64; 4], hit: Option<GazeHit>) -> Self {
        let (hit_point, object_id) = match hit {
            Some(GazeHit::Object { object_id, point }) => (Some(point), Some(object_id)),
            Some(GazeHit::World { point }) => (Some(point), None),
            None => (None, None),
        };
        Self {
            time: now_secs(),
            position,
            rotation,
            hit_point,
            object_id,
        }
    }
}

pub struct GazeStream {
    context: Arc<SessionContext>,
    dispatcher: Dispatcher,
    buffer: Mutex<BatchBuffer<GazeRecord>>,
}

impl GazeStream {
    pub(crate) fn new(
        context: Arc<SessionContext>,
        gateway: Arc<dyn Gateway>,
        batch_size: usize,
    ) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(StreamKind::Gaze, gateway),
            buffer: Mutex::new(BatchBuffer::new(batch_size)),
        }
    }

    /// Record one pose sample.
    pub fn record_gaze(&self, position: [f64; 3], rotation: [f64; 4], hit: Option<GazeHit>) {
        let full = self
            .buffer
            .lock()
            .push(GazeRecord::new(position, rotation, hit));
        if full {
            dispatch::auto_flush(StreamKind::Gaze, &self.dispatcher, || self.prepare());
        }
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

        let mut buffer = self.buffer.lock();
        // Pending properties alone are worth a batch
        if buffer.is_empty() && self.context.pending_properties().is_empty() {
            return Staged::Skipped(SkipReason::NothingToSend);
        }

        let (part, records) = buffer.take();
        let count = records.len();
        let mut body = serde_json::json!({
            "userid": self.context.participant_id(),
            "timestamp": self.context.session_timestamp(),
            "sessionid": self.context.session_id(),
            "part": part,
            "hmdtype": self.context.hmd_type(),
            "interval": self.context.gaze_interval(),
            "formatversion": FORMAT_VERSION,
            "data": records,
        });

        let properties = self.context.take_pending_properties();
        if !properties.is_empty() {
            body["properties"] = serde_json::json!(properties);
        }

        self.dispatcher.stage(part, scene, count, body)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn part(&self) -> u32 {
        self.buffer.lock().part()
    }

    pub fn records(&self) -> Vec<GazeRecord> {
        self.buffer.lock().records().to_vec()
    }

    pub fn batch_history(&self) -> Vec<BatchRecord> {
        self.dispatcher.history()
    }

    pub fn batch_state(&self, part: u32) -> Option<BatchState> {
        self.dispatcher.batch_state(part)
    }

    pub(crate) fn end_session(&self) {
        self.buffer.lock().reset();
        self.dispatcher.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, scene, settle, RecordingGateway};
    use serde_json::json;

    const POS: [f64; 3] = [0.0, 1.6, 0.0];
    const ROT: [f64; 4] = [0.0, 0.0, 0.0, 1.0];

    fn stream(batch_size: usize) -> (Arc<SessionContext>, Arc<RecordingGateway>, GazeStream) {
        let context = Arc::new(SessionContext::new(&config()));
        let gateway = RecordingGateway::new();
        let stream = GazeStream::new(context.clone(), gateway.clone(), batch_size);
        context.set_scene(scene());
        (context, gateway, stream)
    }

    #[test]
    fn test_hit_variants_serialize() {
        let object = GazeRecord::new(
            POS,
            ROT,
            Some(GazeHit::Object {
                object_id: "cube".to_string(),
                point: [0.1, 0.2, 0.3],
            }),
        );
        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["g"], json!([0.1, 0.2, 0.3]));
        assert_eq!(value["o"], "cube");

        let world = GazeRecord::new(POS, ROT, Some(GazeHit::World { point: [5.0, 0.0, 2.0] }));
        let value = serde_json::to_value(&world).unwrap();
        assert_eq!(value["g"], json!([5.0, 0.0, 2.0]));
        assert!(value.get("o").is_none());

        let miss = serde_json::to_value(GazeRecord::new(POS, ROT, None)).unwrap();
        assert!(miss.get("g").is_none());
        assert_eq!(miss["r"], json!([0.0, 0.0, 0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_payload_carries_device_fields() {
        let (ctx, gateway, stream) = stream(10);
        assert!(ctx.try_activate());
        stream.record_gaze(POS, ROT, None);

        stream.send_data().await.unwrap();
        let body = &gateway.posts_for(StreamKind::Gaze)[0].body;
        assert_eq!(body["hmdtype"], "test-hmd");
        assert_eq!(body["interval"], 0.1);
        assert_eq!(body["formatversion"], "1.0");
        assert_eq!(body["part"], 1);
        assert!(body.get("properties").is_none());
    }

    #[tokio::test]
    async fn test_pending_properties_ride_along_once() {
        let (ctx, gateway, stream) = stream(10);
        assert!(ctx.try_activate());
        ctx.set_session_property("user.name", "alice");

        // No samples, but properties still go out
        let outcome = stream.send_data().await.unwrap();
        assert!(outcome.is_sent());
        let body = &gateway.posts()[0].body;
        assert_eq!(body["properties"]["user.name"], "alice");
        assert_eq!(body["data"], json!([]));

        let outcome = stream.send_data().await.unwrap();
        assert_eq!(outcome, Dispatch::Skipped(SkipReason::NothingToSend));
    }

    #[tokio::test]
    async fn test_threshold_flush() {
        let (ctx, gateway, stream) = stream(3);
        assert!(ctx.try_activate());
        for _ in 0..3 {
            stream.record_gaze(POS, ROT, None);
        }
        assert!(stream.is_empty());

        settle().await;
        assert_eq!(gateway.posts_for(StreamKind::Gaze).len(), 1);
        assert_eq!(
            stream.batch_state(1),
            Some(BatchState::Confirmed { status: 200 })
        );
    }

    #[tokio::test]
    async fn test_inactive_keeps_samples() {
        let (_ctx, gateway, stream) = stream(2);
        stream.record_gaze(POS, ROT, None);
        stream.record_gaze(POS, ROT, None);
        settle().await;

        assert_eq!(stream.len(), 2);
        assert!(gateway.posts().is_empty());
    }
}
