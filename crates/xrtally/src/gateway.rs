//! Collector transport.
//!
//! Every stream dispatch is exactly one call through a [`Gateway`]; there are
//! no retries. [`HttpGateway`] is the reqwest implementation used in production.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::Value;
use tallyconf::NetworkConfig;

use crate::context::SceneRef;
use crate::dispatch::StreamKind;
use crate::error::GatewayError;

/// Collector endpoints the SDK talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `{stream}/{sceneId}?version={sceneVersion}`
    Stream(StreamKind),
    /// `questionSetHooks/{hook}/questionSet`
    QuestionSet { hook: String },
    /// `questionSets/{name}/{version}/responses`
    QuestionSetResponses { name: String, version: String },
}

impl Endpoint {
    /// Path below the versioned base URL, without the scene query.
    pub fn path(&self, scene: Option<&SceneRef>) -> String {
        match self {
            Endpoint::Stream(stream) => {
                let scene_id = scene.map(|s| s.scene_id.as_str()).unwrap_or_default();
                format!("{}/{}", stream.endpoint(), scene_id)
            }
            Endpoint::QuestionSet { hook } => format!("questionSetHooks/{}/questionSet", hook),
            Endpoint::QuestionSetResponses { name, version } => {
                format!("questionSets/{}/{}/responses", name, version)
            }
        }
    }
}

/// Single-call transport consumed by every stream.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// POST one stream batch for `scene`. Resolves with the HTTP status code.
    async fn post(
        &self,
        stream: StreamKind,
        scene: &SceneRef,
        body: &Value,
    ) -> Result<u16, GatewayError>;

    /// GET the question set bound to an exit poll hook.
    async fn get_question_set(&self, hook: &str) -> Result<Value, GatewayError>;

    /// POST a completed exit poll response. Resolves with the HTTP status code.
    async fn post_exitpoll(
        &self,
        name: &str,
        version: &str,
        body: &Value,
    ) -> Result<u16, GatewayError>;
}

/// reqwest-backed collector client.
pub struct HttpGateway {
    base_url: String,
    api_key: String,
    client: Client,
    online: AtomicBool,
}

impl HttpGateway {
    pub fn new(config: &NetworkConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Use a preconfigured client (proxies, timeouts, TLS roots).
    pub fn with_client(config: &NetworkConfig, client: Client) -> Self {
        Self {
            base_url: config.base_url(),
            api_key: config.api_key.clone(),
            client,
            online: AtomicBool::new(true),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Report connectivity. While offline every call short-circuits with
    /// [`GatewayError::Offline`] before touching the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.is_online() {
            Ok(())
        } else {
            tracing::debug!("offline, skipping collector request");
            Err(GatewayError::Offline)
        }
    }

    fn url(&self, endpoint: &Endpoint, scene: Option<&SceneRef>) -> String {
        format!("{}/{}", self.base_url, endpoint.path(scene))
    }

    fn authorization(&self) -> String {
        format!("APIKEY:DATA {}", self.api_key)
    }

    async fn post_json(
        &self,
        url: String,
        query: Option<(&str, &str)>,
        body: &Value,
    ) -> Result<u16, GatewayError> {
        let mut req_builder = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.authorization());

        if let Some(query) = query {
            req_builder = req_builder.query(&[query]);
        }

        let response = req_builder
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    #[tracing::instrument(skip(self, scene, body), fields(scene.id = %scene.scene_id))]
    async fn post(
        &self,
        stream: StreamKind,
        scene: &SceneRef,
        body: &Value,
    ) -> Result<u16, GatewayError> {
        self.check_online()?;
        let url = self.url(&Endpoint::Stream(stream), Some(scene));
        self.post_json(url, Some(("version", scene.version_number.as_str())), body)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_question_set(&self, hook: &str) -> Result<Value, GatewayError> {
        self.check_online()?;
        let url = self.url(
            &Endpoint::QuestionSet {
                hook: hook.to_string(),
            },
            None,
        );

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Protocol(format!("Failed to parse question set: {}", e)))
    }

    #[tracing::instrument(skip(self, body))]
    async fn post_exitpoll(
        &self,
        name: &str,
        version: &str,
        body: &Value,
    ) -> Result<u16, GatewayError> {
        self.check_online()?;
        let url = self.url(
            &Endpoint::QuestionSetResponses {
                name: name.to_string(),
                version: version.to_string(),
            },
            None,
        );
        self.post_json(url, None, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkConfig {
        NetworkConfig {
            scheme: "https".to_string(),
            host: "collector.test".to_string(),
            version: 0,
            api_key: "KEY".to_string(),
        }
    }

    fn scene() -> SceneRef {
        SceneRef {
            scene_name: "Lobby".to_string(),
            scene_id: "abc".to_string(),
            version_number: "2".to_string(),
        }
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(
            Endpoint::Stream(StreamKind::Events).path(Some(&scene())),
            "events/abc"
        );
        assert_eq!(
            Endpoint::Stream(StreamKind::Dynamics).path(Some(&scene())),
            "dynamics/abc"
        );
        assert_eq!(
            Endpoint::QuestionSet {
                hook: "end_survey".to_string()
            }
            .path(None),
            "questionSetHooks/end_survey/questionSet"
        );
        assert_eq!(
            Endpoint::QuestionSetResponses {
                name: "survey".to_string(),
                version: "3".to_string()
            }
            .path(None),
            "questionSets/survey/3/responses"
        );
    }

    #[test]
    fn test_url_and_auth() {
        let gateway = HttpGateway::new(&network());
        assert_eq!(gateway.base_url(), "https://collector.test/v0");
        assert_eq!(
            gateway.url(&Endpoint::Stream(StreamKind::Gaze), Some(&scene())),
            "https://collector.test/v0/gaze/abc"
        );
        assert_eq!(gateway.authorization(), "APIKEY:DATA KEY");
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let gateway = HttpGateway::new(&network());
        gateway.set_online(false);

        let result = gateway
            .post(StreamKind::Sensors, &scene(), &serde_json::json!({}))
            .await;
        assert_eq!(result, Err(GatewayError::Offline));

        let result = gateway.get_question_set("hook").await;
        assert_eq!(result, Err(GatewayError::Offline));
    }
}
