//! Named application events with a position and optional properties.
//!
//! Events may be recorded before a session starts; they stay buffered and go
//! out with the first flush after the session becomes active.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::BatchBuffer;
use crate::context::{now_secs, Properties, SceneRef, SessionContext, FORMAT_VERSION};
use crate::dispatch::{
    self, BatchRecord, BatchState, Dispatch, Dispatcher, SkipReason, Staged, StreamKind,
};
use crate::error::TallyError;
use crate::gateway::Gateway;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomEventRecord {
    pub name: String,
    pub time: f64,
    pub point: [f64; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

pub struct CustomEventStream {
    context: Arc<SessionContext>,
    dispatcher: Dispatcher,
    buffer: Mutex<BatchBuffer<CustomEventRecord>>,
}

impl CustomEventStream {
    pub(crate) fn new(
        context: Arc<SessionContext>,
        gateway: Arc<dyn Gateway>,
        batch_size: usize,
    ) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(StreamKind::Events, gateway),
            buffer: Mutex::new(BatchBuffer::new(batch_size)),
        }
    }

    /// Record an event. Reaching the batch size flushes in the background.
    pub fn send(&self, name: impl Into<String>, point: [f64; 3], properties: Option<Properties>) {
        let record = CustomEventRecord {
            name: name.into(),
            time: now_secs(),
            point,
            properties: properties.filter(|p| !p.is_empty()),
        };

        let full = self.buffer.lock().push(record);
        if full {
            dispatch::auto_flush(StreamKind::Events, &self.dispatcher, || self.prepare());
        }
    }

    /// Flush buffered events now.
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
        if buffer.is_empty() {
            return Staged::Skipped(SkipReason::NothingToSend);
        }

        let (part, records) = buffer.take();
        let count = records.len();
        let body = serde_json::json!({
            "userid": self.context.participant_id(),
            "timestamp": self.context.session_timestamp(),
            "sessionid": self.context.session_id(),
            "part": part,
            "formatversion": FORMAT_VERSION,
            "data": records,
        });
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

    /// Part number the next batch will carry.
    pub fn part(&self) -> u32 {
        self.buffer.lock().part()
    }

    pub fn records(&self) -> Vec<CustomEventRecord> {
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
    use crate::test_support::{config, scene, settle, RecordingGateway, Reply};

    fn stream(batch_size: usize) -> (Arc<SessionContext>, Arc<RecordingGateway>, CustomEventStream) {
        let context = Arc::new(SessionContext::new(&config()));
        let gateway = RecordingGateway::new();
        let stream = CustomEventStream::new(context.clone(), gateway.clone(), batch_size);
        (context, gateway, stream)
    }

    fn activate(context: &SessionContext) {
        context.set_scene(scene());
        assert!(context.try_activate());
    }

    #[test]
    fn test_buffers_before_session() {
        let (_ctx, gateway, stream) = stream(4);
        for i in 0..3 {
            stream.send(format!("event-{}", i), [0.0, 1.0, 2.0], None);
        }
        assert_eq!(stream.len(), 3);
        assert!(gateway.posts().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_clears_synchronously() {
        let (ctx, gateway, stream) = stream(2);
        activate(&ctx);

        stream.send("a", [0.0; 3], None);
        assert_eq!(stream.len(), 1);
        stream.send("b", [0.0; 3], None);
        // Cleared before the delivery task has run
        assert_eq!(stream.len(), 0);
        assert_eq!(stream.part(), 2);

        settle().await;
        let posts = gateway.posts_for(StreamKind::Events);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body["part"], 1);
        assert_eq!(posts[0].body["data"][1]["name"], "b");
    }

    #[tokio::test]
    async fn test_inactive_threshold_keeps_records() {
        let (ctx, gateway, stream) = stream(2);
        ctx.set_scene(scene());

        for _ in 0..5 {
            stream.send("pre", [0.0; 3], None);
        }
        settle().await;
        assert_eq!(stream.len(), 5);
        assert!(gateway.posts().is_empty());

        let outcome = stream.send_data().await.unwrap();
        assert_eq!(outcome, Dispatch::Skipped(SkipReason::SessionInactive));
        assert_eq!(stream.len(), 5);
    }

    #[tokio::test]
    async fn test_no_scene_rejects_and_keeps_records() {
        let (ctx, _gateway, stream) = stream(10);
        assert!(ctx.try_activate());
        stream.send("a", [0.0; 3], None);

        let err = stream.send_data().await.unwrap_err();
        assert!(matches!(err, TallyError::NoSceneSelected));
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let (ctx, gateway, stream) = stream(10);
        activate(&ctx);
        stream.send(
            "door_opened",
            [1.0, 2.0, 3.0],
            Some(Properties::new().with("door", "north")),
        );
        stream.send("empty_props", [0.0; 3], Some(Properties::new()));

        let outcome = stream.send_data().await.unwrap();
        assert_eq!(outcome, Dispatch::Sent { status: 200 });

        let body = &gateway.posts()[0].body;
        assert_eq!(body["userid"], "device-test");
        assert_eq!(body["sessionid"], ctx.session_id().as_str());
        assert_eq!(body["timestamp"], ctx.session_timestamp());
        assert_eq!(body["formatversion"], "1.0");
        assert_eq!(body["data"][0]["point"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(body["data"][0]["properties"]["door"], "north");
        assert!(body["data"][1].get("properties").is_none());
        assert!(body["data"][0]["time"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_failed_send_loses_batch() {
        let (ctx, gateway, stream) = stream(10);
        activate(&ctx);
        gateway.reply_once(Reply::Transport);

        stream.send("a", [0.0; 3], None);
        let err = stream.send_data().await.unwrap_err();
        assert!(err.is_data_loss());
        assert_eq!(stream.len(), 0);
        assert!(matches!(stream.batch_state(1), Some(BatchState::Lost { .. })));

        // Next batch takes the next part number
        stream.send("b", [0.0; 3], None);
        stream.send_data().await.unwrap();
        assert_eq!(gateway.posts()[1].body["part"], 2);
    }

    #[tokio::test]
    async fn test_appends_during_inflight_start_new_batch() {
        let (ctx, gateway, stream) = stream(10);
        activate(&ctx);
        let gate = gateway.hold();
        let stream = Arc::new(stream);

        stream.send("first", [0.0; 3], None);
        let task = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.send_data().await })
        };
        settle().await;
        assert_eq!(stream.batch_state(1), Some(BatchState::Inflight));

        stream.send("second", [0.0; 3], None);
        assert_eq!(stream.len(), 1);

        gate.add_permits(1);
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_sent());
        assert_eq!(stream.records()[0].name, "second");
    }

    #[tokio::test]
    async fn test_stale_delivery_leaves_new_session_ledger_alone() {
        let (ctx, gateway, stream) = stream(10);
        activate(&ctx);
        let stream = Arc::new(stream);

        let old_gate = gateway.hold();
        stream.send("old", [0.0; 3], None);
        let old = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.send_data().await })
        };
        settle().await;

        stream.end_session();
        let new_gate = gateway.hold();
        stream.send("new", [0.0; 3], None);
        let new = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.send_data().await })
        };
        settle().await;
        assert_eq!(stream.batch_state(1), Some(BatchState::Inflight));

        new_gate.add_permits(1);
        assert_eq!(new.await.unwrap().unwrap(), Dispatch::Sent { status: 200 });

        // Old session's part 1 fails after the new part 1 was confirmed
        gateway.reply_once(Reply::Status(500));
        old_gate.add_permits(1);
        assert!(old.await.unwrap().is_err());

        assert_eq!(
            stream.batch_state(1),
            Some(BatchState::Confirmed { status: 200 })
        );
        assert_eq!(stream.batch_history().len(), 1);
    }

    #[test]
    fn test_end_session_resets() {
        let (_ctx, _gateway, stream) = stream(10);
        stream.send("a", [0.0; 3], None);
        stream.end_session();
        assert_eq!(stream.len(), 0);
        assert_eq!(stream.part(), 1);
    }
}
