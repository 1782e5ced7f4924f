//! Exit poll client: fetch a question set by hook, collect typed answers,
//! submit them, and mirror the answers into a summary custom event.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{now_secs, Properties, SessionContext};
use crate::dispatch::Dispatch;
use crate::error::{GatewayError, TallyError};
use crate::gateway::Gateway;
use crate::streams::CustomEventStream;

/// Name of the custom event that mirrors a submitted poll.
pub const EXITPOLL_EVENT: &str = "exitpoll";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionKind {
    HappySad,
    Thumbs,
    Boolean,
    Multiple,
    Scale,
    Voice,
}

impl QuestionKind {
    /// Map a question type name. Unknown names count as `BOOLEAN`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "HAPPYSAD" => QuestionKind::HappySad,
            "THUMBS" => QuestionKind::Thumbs,
            "MULTIPLE" => QuestionKind::Multiple,
            "SCALE" => QuestionKind::Scale,
            "VOICE" => QuestionKind::Voice,
            _ => QuestionKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    Bool(bool),
    /// Base64 audio for voice questions
    Text(String),
}

impl AnswerValue {
    /// Numeric form used in the summary event.
    pub fn as_event_number(&self) -> f64 {
        match self {
            AnswerValue::Number(n) => *n,
            AnswerValue::Bool(true) => 1.0,
            AnswerValue::Bool(false) => 0.0,
            AnswerValue::Text(_) => 0.0,
        }
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Number(value as f64)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub value: AnswerValue,
}

/// Response envelope posted to the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitPollResponse {
    pub user_id: String,
    pub question_set_id: String,
    pub session_id: String,
    pub hook: String,
    pub scene_id: String,
    pub version_number: String,
    pub question_set_name: String,
    pub question_set_version: String,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Default)]
struct PollState {
    question_set: Option<Value>,
    question_set_string: Option<String>,
    response: Option<ExitPollResponse>,
    requested_at: Option<f64>,
}

pub struct ExitPollClient {
    context: Arc<SessionContext>,
    gateway: Arc<dyn Gateway>,
    events: Arc<CustomEventStream>,
    state: Mutex<PollState>,
}

impl ExitPollClient {
    pub(crate) fn new(
        context: Arc<SessionContext>,
        gateway: Arc<dyn Gateway>,
        events: Arc<CustomEventStream>,
    ) -> Self {
        Self {
            context,
            gateway,
            events,
            state: Mutex::new(PollState::default()),
        }
    }

    /// Fetch and cache the question set bound to `hook`.
    #[tracing::instrument(skip(self))]
    pub async fn request_question_set(&self, hook: &str) -> Result<(), TallyError> {
        if !self.context.is_active() {
            return Err(TallyError::ExitPollInactive {
                operation: "requestQuestionSet",
            });
        }

        let question_set = self.gateway.get_question_set(hook).await?;
        let id = question_set
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| TallyError::InvalidQuestionSet("missing id".to_string()))?;
        let (name, version) = id
            .split_once(':')
            .ok_or_else(|| TallyError::InvalidQuestionSet(format!("id '{}' is not name:version", id)))?;

        let scene = self.context.scene();
        let response = ExitPollResponse {
            user_id: self.context.participant_id(),
            question_set_id: id.to_string(),
            session_id: self.context.session_id(),
            hook: hook.to_string(),
            scene_id: scene.scene_id,
            version_number: scene.version_number,
            question_set_name: name.to_string(),
            question_set_version: version.to_string(),
            answers: Vec::new(),
        };

        debug!(question_set = id, "question set received");
        let mut state = self.state.lock();
        state.question_set_string = Some(question_set.to_string());
        state.question_set = Some(question_set);
        state.response = Some(response);
        state.requested_at = Some(now_secs());
        Ok(())
    }

    pub fn get_question_set(&self) -> Option<Value> {
        self.state.lock().question_set.clone()
    }

    /// Question set exactly as serialized when it was cached.
    pub fn question_set_string(&self) -> Option<String> {
        self.state.lock().question_set_string.clone()
    }

    pub fn response(&self) -> Option<ExitPollResponse> {
        self.state.lock().response.clone()
    }

    pub fn add_answer(&self, kind: &str, value: impl Into<AnswerValue>) -> Result<(), TallyError> {
        let mut state = self.state.lock();
        let response = state.response.as_mut().ok_or(TallyError::NoQuestionSet {
            operation: "addAnswer",
        })?;
        response.answers.push(Answer {
            kind: QuestionKind::parse(kind),
            value: value.into(),
        });
        Ok(())
    }

    /// Post the collected answers. The summary event is recorded and the
    /// cached question set cleared whatever the post outcome.
    #[tracing::instrument(skip(self))]
    pub async fn send_all_answers(&self, position: Option<[f64; 3]>) -> Result<Dispatch, TallyError> {
        if !self.context.is_active() {
            return Err(TallyError::ExitPollInactive {
                operation: "sendAllAnswers",
            });
        }

        let (response, requested_at) = {
            let state = self.state.lock();
            let response = state.response.clone().ok_or(TallyError::NoQuestionSet {
                operation: "sendAllAnswers",
            })?;
            (response, state.requested_at)
        };

        let body = serde_json::to_value(&response)
            .map_err(|e| GatewayError::Protocol(format!("Failed to encode response: {}", e)))?;
        let result = self
            .gateway
            .post_exitpoll(
                &response.question_set_name,
                &response.question_set_version,
                &body,
            )
            .await;

        let mut properties = Properties::new()
            .with("userId", response.user_id.as_str())
            .with("questionSetId", response.question_set_id.as_str())
            .with("hook", response.hook.as_str())
            .with("sceneId", response.scene_id.as_str());
        if let Some(requested_at) = requested_at {
            properties.set("duration", now_secs() - requested_at);
        }
        for (i, answer) in response.answers.iter().enumerate() {
            properties.set(format!("Answer{}", i), answer.value.as_event_number());
        }
        self.events
            .send(EXITPOLL_EVENT, position.unwrap_or_default(), Some(properties));

        *self.state.lock() = PollState::default();

        match result {
            Ok(status) if (200..300).contains(&status) => {
                info!(answers = response.answers.len(), "exit poll submitted");
                Ok(Dispatch::Sent { status })
            }
            Ok(status) => {
                warn!(status, "exit poll rejected");
                Err(GatewayError::Rejected { status }.into())
            }
            Err(e) => {
                warn!(error = %e, "exit poll submission failed");
                Err(e.into())
            }
        }
    }

    pub(crate) fn end_session(&self) {
        *self.state.lock() = PollState::default();
    }
}
