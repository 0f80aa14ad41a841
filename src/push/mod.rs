pub mod dto;

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;

const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub server_key: String,
    pub endpoint: String,
}

impl PushConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let server_key = env::var("FCM_SERVER_KEY")
            .map_err(|_| AppError::Config("FCM_SERVER_KEY is not set".to_string()))?;
        let endpoint =
            env::var("FCM_ENDPOINT").unwrap_or_else(|_| DEFAULT_FCM_ENDPOINT.to_string());

        Ok(Self {
            server_key,
            endpoint,
        })
    }
}

/// Notification shown on the student's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
}

#[async_trait]
pub trait PushClient: Send + Sync {
    /// Resolves once the provider accepted the message for `token`.
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), AppError>;
}

pub struct FcmHttpClient {
    client: Client,
    config: PushConfig,
}

impl FcmHttpClient {
    pub fn new(config: PushConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PushClient for FcmHttpClient {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), AppError> {
        let request_body = dto::SendRequest {
            to: token,
            notification: dto::Notification {
                title: &payload.title,
                body: &payload.body,
                icon: &payload.icon,
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("key={}", self.config.server_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Push(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::Push(format!("FCM error {}: {}", status, body)));
        }

        let parsed: dto::SendResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::Push(format!("Failed to parse FCM response: {}", e)))?;

        // FCM answers 200 even when the token is rejected
        if parsed.failure > 0 {
            let reason = parsed
                .results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(AppError::Push(reason));
        }

        debug!(
            "FCM accepted message {:?} ({} success)",
            parsed.results.first().and_then(|r| r.message_id.as_deref()),
            parsed.success
        );
        Ok(())
    }
}

pub struct NoopPushClient;

#[async_trait]
impl PushClient for NoopPushClient {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), AppError> {
        debug!("push disabled, dropping \"{}\" for token {}", payload.title, token);
        Ok(())
    }
}
