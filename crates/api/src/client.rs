//! Backend worker-pull/worker-push client.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::json,
    tracing::debug,
};

use {
    mirrelay_common::types::{
        ConnectionState, DestinationConfig, Fingerprint, NewMessage, OutboundMessage, Source,
    },
    mirrelay_config::schema::BackendConfig,
};

use crate::error::{Error, Result};

/// Client for the backend queue/API collaborator.
///
/// Cheap to clone; the underlying `reqwest::Client` is an `Arc` internally.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    worker_key: Secret<String>,
}

#[derive(Deserialize)]
struct SourcesResponse {
    #[serde(default)]
    channels: Vec<Source>,
}

#[derive(Deserialize)]
struct PendingResponse {
    #[serde(default)]
    messages: Vec<OutboundMessage>,
}

#[derive(Deserialize)]
struct DestinationResponse {
    config: Option<DestinationConfig>,
}

impl ApiClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/functions/v1", config.base_url.trim_end_matches('/')),
            worker_key: config.worker_key.clone(),
        })
    }

    /// Fetch the desired source set (enabled flag included; filtering is the
    /// reconciler's job).
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let body: SourcesResponse = self.pull("get_channels").await?;
        debug!(count = body.channels.len(), "fetched sources");
        Ok(body.channels)
    }

    /// Fetch messages queued for delivery.
    pub async fn fetch_pending_messages(&self) -> Result<Vec<OutboundMessage>> {
        let body: PendingResponse = self.pull("get_pending_messages").await?;
        Ok(body.messages)
    }

    /// Fetch the outbound destination configuration, if one is set.
    pub async fn get_destination_config(&self) -> Result<Option<DestinationConfig>> {
        let body: DestinationResponse = self.pull("get_destination_config").await?;
        Ok(body.config)
    }

    /// Push a newly observed message to the queue.
    ///
    /// The fingerprint is the idempotency key: pushing the same fingerprint
    /// twice must not create a second queue row, which the backend enforces.
    pub async fn push_message(&self, source_id: &str, message: &NewMessage) -> Result<()> {
        let mut data = serde_json::to_value(message)?;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("source_id".into(), json!(source_id));
        }
        self.push("push_message", data).await
    }

    /// Advance the per-source cursor. Best-effort from the caller's point of
    /// view; the push itself is the durable record of intent.
    pub async fn set_cursor(
        &self,
        source_id: &str,
        fingerprint: &Fingerprint,
        last_seen_at: Option<&str>,
    ) -> Result<()> {
        self.push(
            "set_cursor",
            json!({
                "source_id": source_id,
                "fingerprint": fingerprint,
                "last_seen_at": last_seen_at,
            }),
        )
        .await
    }

    /// Mark a queued message as delivered.
    pub async fn mark_sent(&self, message_id: &str) -> Result<()> {
        self.push("mark_sent", json!({ "message_id": message_id }))
            .await
    }

    /// Mark a queued message as failed, with the reason.
    pub async fn mark_failed(&self, message_id: &str, reason: &str) -> Result<()> {
        self.push(
            "mark_failed",
            json!({ "message_id": message_id, "error": reason }),
        )
        .await
    }

    /// Report component liveness to the status collaborator.
    pub async fn report_status(
        &self,
        component: &str,
        state: ConnectionState,
        error: Option<&str>,
    ) -> Result<()> {
        self.push(
            "update_connection_status",
            json!({
                "service": component,
                "status": state.as_str(),
                "error_message": error,
            }),
        )
        .await
    }

    /// Send an operator-visible log entry to the backend.
    pub async fn log(
        &self,
        level: &str,
        message: &str,
        source_name: Option<&str>,
        details: Option<&str>,
    ) -> Result<()> {
        self.push(
            "log",
            json!({
                "level": level,
                "message": message,
                "channel_name": source_name,
                "details": details,
            }),
        )
        .await
    }

    async fn pull<T: serde::de::DeserializeOwned>(&self, action: &str) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/worker-pull", self.base_url))
            .query(&[("action", action)])
            .bearer_auth(self.worker_key.expose_secret())
            .send()
            .await?;
        let body = Self::check(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn push(&self, action: &str, data: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/worker-push", self.base_url))
            .bearer_auth(self.worker_key.expose_secret())
            .json(&json!({ "action": action, "data": data }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {secrecy::Secret, serde_json::json};

    use {mirrelay_common::types::MessageStatus, mirrelay_config::schema::BackendConfig};

    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> ApiClient {
        ApiClient::new(&BackendConfig {
            base_url: server.url(),
            worker_key: Secret::new("test-key".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn list_sources_parses_channels() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/functions/v1/worker-pull")
            .match_query(mockito::Matcher::UrlEncoded(
                "action".into(),
                "get_channels".into(),
            ))
            .match_header("authorization", "Bearer test-key")
            .with_body(
                json!({
                    "channels": [{
                        "id": "src-1",
                        "url": "https://chat.example.com/channels/1/2",
                        "name": "general",
                        "enabled": true
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let sources = client_for(&server).list_sources().await.unwrap();
        mock.assert_async().await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "src-1");
        assert!(sources[0].enabled);
    }

    #[tokio::test]
    async fn fetch_pending_parses_messages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/functions/v1/worker-pull")
            .match_query(mockito::Matcher::UrlEncoded(
                "action".into(),
                "get_pending_messages".into(),
            ))
            .with_body(
                json!({
                    "messages": [{
                        "id": "m1",
                        "source_id": "src-1",
                        "fingerprint": "ab".repeat(16),
                        "author": "alice",
                        "text": "hi",
                        "status": "pending"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server).fetch_pending_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn push_message_includes_source_id_and_action() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/functions/v1/worker-push")
            .match_body(mockito::Matcher::PartialJson(json!({
                "action": "push_message",
                "data": {
                    "source_id": "src-1",
                    "fingerprint": "ab".repeat(16),
                    "native_id": "chat-messages-9",
                }
            })))
            .with_body("{}")
            .create_async()
            .await;

        let message = NewMessage {
            fingerprint: Fingerprint("ab".repeat(16)),
            native_id: "chat-messages-9".into(),
            author: "alice".into(),
            text: "hi".into(),
            attachments: vec![],
        };
        client_for(&server)
            .push_message("src-1", &message)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_typed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/functions/v1/worker-push")
            .with_status(503)
            .with_body("backend down")
            .create_async()
            .await;

        let err = client_for(&server)
            .mark_sent("m1")
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "backend down");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn destination_config_may_be_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/functions/v1/worker-pull")
            .match_query(mockito::Matcher::UrlEncoded(
                "action".into(),
                "get_destination_config".into(),
            ))
            .with_body(json!({ "config": null }).to_string())
            .create_async()
            .await;

        let dest = client_for(&server).get_destination_config().await.unwrap();
        assert!(dest.is_none());
    }
}
