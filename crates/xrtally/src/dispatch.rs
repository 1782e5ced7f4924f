//! Batch dispatch: part numbering, optimistic clear, and delivery outcomes.
//!
//! A dispatch runs in two phases. Staging is synchronous: the stream assigns
//! the next part number, moves its records into a [`PreparedBatch`] and is
//! empty again before anything is awaited. Delivery is the single network
//! call. Each staged batch moves through
//! `Inflight -> Confirmed | Lost` in the stream's [`BatchLedger`], so a batch
//! that was cleared and then failed is visible rather than silently gone.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::SceneRef;
use crate::error::{GatewayError, TallyError};
use crate::gateway::Gateway;

/// Default number of batch outcomes remembered per stream
pub const DEFAULT_LEDGER_CAPACITY: usize = 64;

/// The four batched streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Gaze,
    Events,
    Sensors,
    Dynamics,
}

impl StreamKind {
    /// Collector endpoint segment.
    pub fn endpoint(&self) -> &'static str {
        match self {
            StreamKind::Gaze => "gaze",
            StreamKind::Events => "events",
            StreamKind::Sensors => "sensors",
            StreamKind::Dynamics => "dynamics",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// Why a dispatch sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No session is running; buffered records are kept
    SessionInactive,
    /// Buffers were empty
    NothingToSend,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SessionInactive => f.write_str("session not active, nothing sent"),
            SkipReason::NothingToSend => f.write_str("no data to send"),
        }
    }
}

/// Successful outcome of a dispatch. Hard failures are `Err(TallyError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent { status: u16 },
    Skipped(SkipReason),
}

impl Dispatch {
    pub fn status(&self) -> Option<u16> {
        match self {
            Dispatch::Sent { status } => Some(*status),
            Dispatch::Skipped(_) => None,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Dispatch::Sent { .. })
    }
}

/// A batch that has left its stream buffer and waits for delivery.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub stream: StreamKind,
    pub part: u32,
    /// Scene captured at staging time; a later scene change does not redirect it
    pub scene: SceneRef,
    pub records: usize,
    pub body: Value,
    /// Ledger generation at staging time; a session end starts a new one
    pub generation: u64,
}

/// Result of the synchronous staging phase.
#[derive(Debug)]
pub enum Staged {
    Ready(PreparedBatch),
    Skipped(SkipReason),
}

/// Delivery state of one staged batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchState {
    Inflight,
    Confirmed { status: u16 },
    Lost { reason: String },
}

/// Ledger entry for one part number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    pub stream: StreamKind,
    pub part: u32,
    pub records: usize,
    pub state: BatchState,
}

/// Ring of recent batch outcomes for one stream.
#[derive(Debug)]
pub struct BatchLedger {
    entries: VecDeque<BatchRecord>,
    capacity: usize,
    generation: u64,
}

impl BatchLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    /// Record a freshly staged batch as in flight.
    pub fn begin(&mut self, batch: &PreparedBatch) {
        // Evict oldest if at capacity
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BatchRecord {
            stream: batch.stream,
            part: batch.part,
            records: batch.records,
            state: BatchState::Inflight,
        });
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move a staged batch to its final state. Evicted parts and batches
    /// staged before the last [`clear`](Self::clear) are ignored.
    pub fn settle(&mut self, batch: &PreparedBatch, state: BatchState) {
        if batch.generation != self.generation {
            return;
        }
        let part = batch.part;
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.part == part) {
            entry.state = state;
        }
    }

    pub fn get(&self, part: u32) -> Option<&BatchRecord> {
        self.entries.iter().rev().find(|e| e.part == part)
    }

    pub fn records(&self) -> Vec<BatchRecord> {
        self.entries.iter().cloned().collect()
    }

    /// Drop every entry and start a new generation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }
}

/// True when a tokio runtime is available to run fire-and-forget deliveries.
pub(crate) fn runtime_available() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Per-stream delivery handle: gateway plus ledger. Cheap to clone into tasks.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    stream: StreamKind,
    gateway: Arc<dyn Gateway>,
    ledger: Arc<Mutex<BatchLedger>>,
}

impl Dispatcher {
    pub(crate) fn new(stream: StreamKind, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            stream,
            gateway,
            ledger: Arc::new(Mutex::new(BatchLedger::new(DEFAULT_LEDGER_CAPACITY))),
        }
    }

    /// Build a batch and log it as in flight. Called while the stream still
    /// holds its buffer lock, right after the records were taken.
    pub(crate) fn stage(
        &self,
        part: u32,
        scene: SceneRef,
        records: usize,
        body: Value,
    ) -> Staged {
        let mut ledger = self.ledger.lock();
        let batch = PreparedBatch {
            stream: self.stream,
            part,
            scene,
            records,
            body,
            generation: ledger.generation(),
        };
        ledger.begin(&batch);
        drop(ledger);
        debug!(stream = %self.stream, part, records, "staged batch");
        Staged::Ready(batch)
    }

    /// Deliver a staged batch, or pass a skip through.
    pub(crate) async fn complete(&self, staged: Staged) -> Result<Dispatch, TallyError> {
        match staged {
            Staged::Ready(batch) => self.deliver(batch).await,
            Staged::Skipped(reason) => Ok(Dispatch::Skipped(reason)),
        }
    }

    #[tracing::instrument(skip(self, batch), fields(stream = %batch.stream, part = batch.part))]
    pub(crate) async fn deliver(&self, batch: PreparedBatch) -> Result<Dispatch, TallyError> {
        let result = self
            .gateway
            .post(batch.stream, &batch.scene, &batch.body)
            .await;

        let failure = match result {
            Ok(status) if (200..300).contains(&status) => {
                self.ledger
                    .lock()
                    .settle(&batch, BatchState::Confirmed { status });
                debug!(status, records = batch.records, "batch delivered");
                return Ok(Dispatch::Sent { status });
            }
            Ok(status) => GatewayError::Rejected { status },
            Err(e) => e,
        };

        self.ledger.lock().settle(
            &batch,
            BatchState::Lost {
                reason: failure.to_string(),
            },
        );
        warn!(error = %failure, records = batch.records, "batch lost");
        Err(TallyError::BatchLost {
            stream: batch.stream,
            part: batch.part,
            source: failure,
        })
    }

    /// Fire-and-forget delivery for threshold flushes.
    pub(crate) fn spawn(&self, batch: PreparedBatch) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            // Failure is already logged and recorded in the ledger
            let _ = dispatcher.deliver(batch).await;
        });
    }

    pub(crate) fn history(&self) -> Vec<BatchRecord> {
        self.ledger.lock().records()
    }

    pub(crate) fn batch_state(&self, part: u32) -> Option<BatchState> {
        self.ledger.lock().get(part).map(|r| r.state.clone())
    }

    pub(crate) fn reset(&self) {
        self.ledger.lock().clear();
    }
}

/// Threshold flush shared by the buffered streams: stage synchronously, then
/// hand delivery to the runtime.
pub(crate) fn auto_flush(
    stream: StreamKind,
    dispatcher: &Dispatcher,
    stage: impl FnOnce() -> Result<Staged, TallyError>,
) {
    if !runtime_available() {
        warn!(%stream, "no async runtime, threshold flush deferred");
        return;
    }
    match stage() {
        Ok(Staged::Ready(batch)) => dispatcher.spawn(batch),
        Ok(Staged::Skipped(reason)) => debug!(%stream, %reason, "threshold flush skipped"),
        Err(TallyError::NoSceneSelected) => {
            debug!(%stream, "threshold reached with no scene selected, holding batch")
        }
        Err(e) => warn!(%stream, error = %e, "threshold flush failed"),
    }
}
