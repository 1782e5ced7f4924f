//! Recording gateway and fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tallyconf::{SceneEntry, TallyConfig};
use tokio::sync::Semaphore;

use crate::context::SceneRef;
use crate::dispatch::StreamKind;
use crate::error::GatewayError;
use crate::gateway::Gateway;

/// How the fake collector answers the next call.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16),
    Offline,
    Transport,
}

#[derive(Debug, Clone)]
pub(crate) struct Posted {
    pub stream: StreamKind,
    pub scene: SceneRef,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub(crate) struct ExitPollPost {
    pub name: String,
    pub version: String,
    pub body: Value,
}

pub(crate) struct RecordingGateway {
    posts: Mutex<Vec<Posted>>,
    exitpoll_posts: Mutex<Vec<ExitPollPost>>,
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Mutex<Reply>,
    question_set: Mutex<Option<Value>>,
    /// When set, stream posts wait for a permit before answering
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingGateway {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(Vec::new()),
            exitpoll_posts: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(Reply::Status(200)),
            question_set: Mutex::new(None),
            gate: Mutex::new(None),
        })
    }

    /// Answer every call with `reply` from now on.
    pub(crate) fn reply_with(&self, reply: Reply) {
        *self.default_reply.lock() = reply;
    }

    /// Answer the next call with `reply`, then fall back to the default.
    pub(crate) fn reply_once(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub(crate) fn serve_question_set(&self, question_set: Value) {
        *self.question_set.lock() = Some(question_set);
    }

    /// Hold stream posts until permits are added to the returned semaphore.
    pub(crate) fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn posts(&self) -> Vec<Posted> {
        self.posts.lock().clone()
    }

    pub(crate) fn posts_for(&self, stream: StreamKind) -> Vec<Posted> {
        self.posts
            .lock()
            .iter()
            .filter(|p| p.stream == stream)
            .cloned()
            .collect()
    }

    pub(crate) fn exitpoll_posts(&self) -> Vec<ExitPollPost> {
        self.exitpoll_posts.lock().clone()
    }

    fn next_reply(&self) -> Reply {
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.lock().clone())
    }

    fn answer(reply: Reply) -> Result<u16, GatewayError> {
        match reply {
            Reply::Status(status) => Ok(status),
            Reply::Offline => Err(GatewayError::Offline),
            Reply::Transport => Err(GatewayError::Transport("connection reset".to_string())),
        }
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn post(
        &self,
        stream: StreamKind,
        scene: &SceneRef,
        body: &Value,
    ) -> Result<u16, GatewayError> {
        self.posts.lock().push(Posted {
            stream,
            scene: scene.clone(),
            body: body.clone(),
        });
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Self::answer(self.next_reply())
    }

    async fn get_question_set(&self, _hook: &str) -> Result<Value, GatewayError> {
        match self.next_reply() {
            Reply::Status(status) if (200..300).contains(&status) => self
                .question_set
                .lock()
                .clone()
                .ok_or_else(|| GatewayError::Http {
                    status: 404,
                    body: "no question set".to_string(),
                }),
            Reply::Status(status) => Err(GatewayError::Http {
                status,
                body: String::new(),
            }),
            other => Self::answer(other).map(|_| Value::Null),
        }
    }

    async fn post_exitpoll(
        &self,
        name: &str,
        version: &str,
        body: &Value,
    ) -> Result<u16, GatewayError> {
        self.exitpoll_posts.lock().push(ExitPollPost {
            name: name.to_string(),
            version: version.to_string(),
            body: body.clone(),
        });
        Self::answer(self.next_reply())
    }
}

pub(crate) fn scene() -> SceneRef {
    SceneRef {
        scene_name: "Lobby".to_string(),
        scene_id: "scene-lobby".to_string(),
        version_number: "3".to_string(),
    }
}

/// Config with two scenes and generous thresholds.
pub(crate) fn config() -> TallyConfig {
    let mut config = TallyConfig::default();
    config.device.device_id = Some("device-test".to_string());
    config.device.hmd_type = "test-hmd".to_string();
    config.scenes.push(SceneEntry::new("Lobby", "scene-lobby", "3"));
    config.scenes.push(SceneEntry::new("Arena", "scene-arena", "1"));
    config
}

/// Let spawned deliveries run to completion on the test runtime.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
