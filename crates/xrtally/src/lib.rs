//! xrtally - session-scoped batching telemetry for immersive applications.
//!
//! Producers push gaze samples, custom events, sensor readings and dynamic
//! object snapshots into in-memory streams. Each stream flushes itself when
//! its configured limit is reached; [`SessionController::send_data`] flushes
//! everything at once. Nothing is sent unless a session is active and a scene
//! is selected.
//!
//! ```rust,no_run
//! use tallyconf::TallyConfig;
//! use xrtally::SessionController;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sdk = SessionController::new(&TallyConfig::load()?);
//! sdk.set_scene("Lobby").await;
//! sdk.start_session();
//! sdk.custom_event().send("door_opened", [0.0, 1.0, 2.0], None);
//! sdk.end_session().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod dispatch;
pub mod dynamic;
pub mod error;
pub mod exitpoll;
pub mod gateway;
pub mod session;
pub mod streams;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use context::{Properties, SceneRef, SessionContext};
pub use dispatch::{BatchRecord, BatchState, Dispatch, SkipReason, StreamKind};
pub use dynamic::{DynamicObjectRegistry, TrackingThresholds};
pub use error::{GatewayError, TallyError};
pub use exitpoll::{AnswerValue, ExitPollClient, QuestionKind};
pub use gateway::{Endpoint, Gateway, HttpGateway};
pub use session::SessionController;
pub use streams::{CustomEventStream, GazeHit, GazeStream, SensorStream};
