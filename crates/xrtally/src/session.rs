//! Session lifecycle and scene selection over all streams.
//!
//! [`SessionController`] owns one [`SessionContext`] and every stream built on
//! it. It is the only writer of the active flag and the selected scene.

use std::sync::Arc;

use serde_json::Value;
use tallyconf::TallyConfig;
use tracing::{error, info, warn};

use crate::context::{now_secs, Properties, SceneRef, SessionContext};
use crate::dispatch::{Dispatch, SkipReason, Staged};
use crate::dynamic::DynamicObjectRegistry;
use crate::error::TallyError;
use crate::exitpoll::ExitPollClient;
use crate::gateway::{Gateway, HttpGateway};
use crate::streams::{CustomEventStream, GazeStream, SensorStream};

pub const SESSION_START_EVENT: &str = "Session Start";
pub const SESSION_END_EVENT: &str = "Session End";
const END_REASON: &str = "Quit from script";

/// Status reported when every stream flushed cleanly.
const SEND_OK: u16 = 200;

/// One staged batch per stream, taken in a single synchronous pass.
struct StagedFlush {
    events: Staged,
    gaze: Staged,
    sensors: Staged,
    dynamics: Staged,
}

pub struct SessionController {
    context: Arc<SessionContext>,
    gateway: Arc<dyn Gateway>,
    gaze: GazeStream,
    events: Arc<CustomEventStream>,
    sensors: SensorStream,
    dynamics: DynamicObjectRegistry,
    exitpoll: ExitPollClient,
}

impl SessionController {
    /// Build the SDK against the configured collector.
    pub fn new(config: &TallyConfig) -> Self {
        Self::with_gateway(config, Arc::new(HttpGateway::new(&config.network)))
    }

    pub fn with_gateway(config: &TallyConfig, gateway: Arc<dyn Gateway>) -> Self {
        let batching = &config.batching;
        let context = Arc::new(SessionContext::new(config));
        let events = Arc::new(CustomEventStream::new(
            context.clone(),
            gateway.clone(),
            batching.event_batch_size,
        ));

        Self {
            gaze: GazeStream::new(context.clone(), gateway.clone(), batching.gaze_batch_size),
            sensors: SensorStream::new(context.clone(), gateway.clone(), batching.sensor_data_limit),
            dynamics: DynamicObjectRegistry::new(
                context.clone(),
                gateway.clone(),
                batching.dynamic_data_limit,
            ),
            exitpoll: ExitPollClient::new(context.clone(), gateway.clone(), events.clone()),
            events,
            context,
            gateway,
        }
    }

    /// Begin a session. Returns false without side effects if one is running.
    pub fn start_session(&self) -> bool {
        if !self.context.try_activate() {
            return false;
        }

        let session_id = self.context.session_id();
        info!(%session_id, timestamp = self.context.session_timestamp(), "session started");
        self.events.send(SESSION_START_EVENT, [0.0; 3], None);
        true
    }

    /// Final flush, then reset every stream. The reset happens even when the
    /// flush fails; its outcome is returned.
    pub async fn end_session(&self) -> Result<Dispatch, TallyError> {
        if !self.context.is_active() {
            return Err(TallyError::SessionNotActive);
        }

        let length = now_secs() - self.context.session_timestamp() as f64;
        self.events.send(
            SESSION_END_EVENT,
            [0.0; 3],
            Some(
                Properties::new()
                    .with("sessionlength", length)
                    .with("Reason", END_REASON),
            ),
        );

        let result = self.send_data().await;
        if let Err(e) = &result {
            warn!(error = %e, "final flush failed");
        }

        self.reset();
        info!(session_length = length, "session ended");
        result
    }

    fn reset(&self) {
        self.context.reset_session();
        self.gaze.end_session();
        self.events.end_session();
        self.sensors.end_session();
        self.dynamics.end_session();
        self.exitpoll.end_session();
    }

    /// Switch scenes by configured name. Buffered data goes to the previous
    /// scene first and the object manifest is replayed to the new one.
    pub async fn set_scene(&self, name: &str) -> SceneRef {
        let previous = self.context.scene();
        let staged = if previous.is_selected() {
            let staged = self.stage_all(&previous);
            self.dynamics.refresh_object_manifest();
            Some(staged)
        } else {
            None
        };

        let scene = self.context.resolve_scene(name).unwrap_or_else(|| {
            error!(scene = name, "scene not found in configuration");
            SceneRef::none()
        });
        self.context.set_scene(scene.clone());
        info!(scene = name, scene_id = %scene.scene_id, "scene selected");

        if let Some(staged) = staged {
            if let Err(e) = self.deliver_all(staged).await {
                warn!(error = %e, previous = %previous.scene_name, "flush before scene change failed");
            }
        }
        scene
    }

    /// Flush every stream concurrently.
    pub async fn send_data(&self) -> Result<Dispatch, TallyError> {
        let scene = self.context.scene();
        if !scene.is_selected() {
            return Err(TallyError::NoSceneSelected);
        }
        if !self.context.is_active() {
            return Ok(Dispatch::Skipped(SkipReason::SessionInactive));
        }

        let staged = self.stage_all(&scene);
        self.deliver_all(staged).await
    }

    /// Stage every stream against `scene`, which the caller has checked.
    /// Either all four buffers are taken or, for a stream with nothing to
    /// send, left alone; no stream can fail halfway through.
    fn stage_all(&self, scene: &SceneRef) -> StagedFlush {
        StagedFlush {
            events: self.events.stage_for(scene.clone()),
            gaze: self.gaze.stage_for(scene.clone()),
            sensors: self.sensors.stage_for(scene.clone()),
            dynamics: self.dynamics.stage_for(scene.clone()),
        }
    }

    /// Await every delivery; the first failure in stream order wins.
    async fn deliver_all(&self, staged: StagedFlush) -> Result<Dispatch, TallyError> {
        let (events, gaze, sensors, dynamics) = tokio::join!(
            self.events.dispatcher().complete(staged.events),
            self.gaze.dispatcher().complete(staged.gaze),
            self.sensors.dispatcher().complete(staged.sensors),
            self.dynamics.dispatcher().complete(staged.dynamics),
        );
        events?;
        gaze?;
        sensors?;
        dynamics?;
        Ok(Dispatch::Sent { status: SEND_OK })
    }

    pub fn set_session_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.set_session_property(key, value);
    }

    /// Session property stored under `user.{key}`.
    pub fn set_user_property(&self, key: &str, value: impl Into<Value>) {
        self.context.set_session_property(format!("user.{}", key), value);
    }

    /// Session property stored under `device.{key}`.
    pub fn set_device_property(&self, key: &str, value: impl Into<Value>) {
        self.context.set_session_property(format!("device.{}", key), value);
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.context.set_user_id(user_id);
    }

    pub fn set_device_id(&self, device_id: impl Into<String>) {
        self.context.set_device_id(device_id);
    }

    pub fn is_session_active(&self) -> bool {
        self.context.is_active()
    }

    pub fn scene(&self) -> SceneRef {
        self.context.scene()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn gaze(&self) -> &GazeStream {
        &self.gaze
    }

    pub fn custom_event(&self) -> &CustomEventStream {
        &self.events
    }

    pub fn sensor(&self) -> &SensorStream {
        &self.sensors
    }

    pub fn dynamic_object(&self) -> &DynamicObjectRegistry {
        &self.dynamics
    }

    pub fn exitpoll(&self) -> &ExitPollClient {
        &self.exitpoll
    }
}
