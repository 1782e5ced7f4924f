//! Scalar sensor readings grouped by metric name.
//!
//! The flush threshold counts individual readings across all groups, not
//! distinct metric names.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::context::{now_secs, SceneRef, SessionContext, FORMAT_VERSION};
use crate::dispatch::{
    self, BatchRecord, BatchState, Dispatch, Dispatcher, SkipReason, Staged, StreamKind,
};
use crate::error::TallyError;
use crate::gateway::Gateway;

/// All readings for one metric since the last flush, as `[time, value]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorGroup {
    pub name: String,
    pub data: Vec<[f64; 2]>,
}

#[derive(Debug)]
struct SensorBuffer {
    groups: Vec<SensorGroup>,
    readings: usize,
    part: u32,
    limit: usize,
}

impl SensorBuffer {
    fn new(limit: usize) -> Self {
        Self {
            groups: Vec::new(),
            readings: 0,
            part: 1,
            limit,
        }
    }

    fn push(&mut self, name: String, reading: [f64; 2]) -> bool {
        match self.groups.iter_mut().find(|g| g.name == name) {
            Some(group) => group.data.push(reading),
            None => self.groups.push(SensorGroup {
                name,
                data: vec![reading],
            }),
        }
        self.readings += 1;
        self.readings >= self.limit
    }

    fn take(&mut self) -> (u32, Vec<SensorGroup>, usize) {
        let part = self.part;
        self.part += 1;
        let readings = std::mem::take(&mut self.readings);
        (part, std::mem::take(&mut self.groups), readings)
    }

    fn reset(&mut self) {
        self.groups.clear();
        self.readings = 0;
        self.part = 1;
    }
}

pub struct SensorStream {
    context: Arc<SessionContext>,
    dispatcher: Dispatcher,
    buffer: Mutex<SensorBuffer>,
}

impl SensorStream {
    pub(crate) fn new(context: Arc<SessionContext>, gateway: Arc<dyn Gateway>, limit: usize) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(StreamKind::Sensors, gateway),
            buffer: Mutex::new(SensorBuffer::new(limit)),
        }
    }

    /// Record one reading for `name`.
    pub fn record_sensor(&self, name: impl Into<String>, value: f64) {
        let full = self.buffer.lock().push(name.into(), [now_secs(), value]);
        if full {
            dispatch::auto_flush(StreamKind::Sensors, &self.dispatcher, || self.prepare());
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
        if buffer.readings == 0 {
            return Staged::Skipped(SkipReason::NothingToSend);
        }

        let (part, groups, readings) = buffer.take();
        let body = serde_json::json!({
            "userid": self.context.participant_id(),
            "timestamp": self.context.session_timestamp(),
            "sessionid": self.context.session_id(),
            "part": part,
            "sessiontype": "sensor",
            "formatversion": FORMAT_VERSION,
            "data": groups,
        });
        self.dispatcher.stage(part, scene, readings, body)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Readings buffered across all metrics.
    pub fn len(&self) -> usize {
        self.buffer.lock().readings
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct metric names currently buffered.
    pub fn metric_count(&self) -> usize {
        self.buffer.lock().groups.len()
    }

    pub fn part(&self) -> u32 {
        self.buffer.lock().part
    }

    pub fn groups(&self) -> Vec<SensorGroup> {
        self.buffer.lock().groups.clone()
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
