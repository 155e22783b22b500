//! Agones SDK client over the sidecar's HTTP gateway.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::{GameServerInfo, GameServerPort, Orchestrator, Result};

#[derive(Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct ReserveRequest {
    seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GameServerResponse {
    #[serde(alias = "objectMeta")]
    object_meta: ObjectMeta,
    status: Status,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectMeta {
    name: String,
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Status {
    state: String,
    ports: Vec<StatusPort>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusPort {
    name: String,
    port: u16,
}

impl From<GameServerResponse> for GameServerInfo {
    fn from(gs: GameServerResponse) -> Self {
        Self {
            name: gs.object_meta.name,
            labels: gs.object_meta.labels,
            state: gs.status.state,
            ports: gs
                .status
                .ports
                .into_iter()
                .map(|p| GameServerPort {
                    name: p.name,
                    port: p.port,
                })
                .collect(),
        }
    }
}

/// Client for the Agones SDK REST gateway (`localhost:9358` by default).
pub struct AgonesClient {
    client: RwLock<Client>,
    base_url: String,
    timeout: Duration,
}

impl AgonesClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        let client = build_client(config.request_timeout)?;
        Ok(Self {
            client: RwLock::new(client),
            base_url: config.base_url(),
            timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn client(&self) -> Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::trace!(operation, %url, "Agones SDK request");

        let response = self
            .client()
            .request(method, &url)
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestratorError::Request {
                operation,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Status {
                operation,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn post_empty(&self, operation: &'static str, path: &str) -> Result<()> {
        self.send(operation, Method::POST, path, &serde_json::json!({}))
            .await
            .map(|_| ())
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OrchestratorError::Request {
            operation: "connect",
            reason: format!("Failed to build HTTP client: {e}"),
        })
}

#[async_trait]
impl Orchestrator for AgonesClient {
    async fn health(&self) -> Result<()> {
        self.post_empty("health", "health").await
    }

    async fn ready(&self) -> Result<()> {
        self.post_empty("ready", "ready").await
    }

    async fn shutdown(&self) -> Result<()> {
        self.post_empty("shutdown", "shutdown").await
    }

    async fn allocate(&self) -> Result<()> {
        self.post_empty("allocate", "allocate").await
    }

    async fn reserve(&self, duration: Duration) -> Result<()> {
        let body = ReserveRequest {
            seconds: duration.as_secs().max(1),
        };
        self.send("reserve", Method::POST, "reserve", &body)
            .await
            .map(|_| ())
    }

    async fn set_label(&self, key: &str, value: &str) -> Result<()> {
        self.send("set_label", Method::PUT, "metadata/label", &KeyValue { key, value })
            .await
            .map(|_| ())
    }

    async fn set_annotation(&self, key: &str, value: &str) -> Result<()> {
        self.send(
            "set_annotation",
            Method::PUT,
            "metadata/annotation",
            &KeyValue { key, value },
        )
        .await
        .map(|_| ())
    }

    async fn game_server(&self) -> Result<GameServerInfo> {
        let url = self.url("gameserver");
        let response = self
            .client()
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::Request {
                operation: "game_server",
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Status {
                operation: "game_server",
                status: status.as_u16(),
            });
        }

        let gs: GameServerResponse =
            response
                .json()
                .await
                .map_err(|e| OrchestratorError::Decode {
                    operation: "game_server",
                    reason: e.to_string(),
                })?;
        Ok(gs.into())
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = build_client(self.timeout)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        tracing::debug!(base_url = %self.base_url, "Rebuilt Agones SDK client");
        Ok(())
    }
}
