use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::PushConfig;
use crate::error::{AppError, AppResult};

/// One rendered push notification addressed to a device credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    /// Structured payload delivered alongside the notification
    /// (e.g. type, appointment_id) for in-app routing.
    pub data: HashMap<String, String>,
}

/// Failure of a single message within a bulk send.
#[derive(Debug, Clone)]
pub struct SendFailure {
    /// True when the credential is permanently invalid and must be removed
    /// from the registry before any further send targets this customer.
    pub permanent: bool,
    pub message: String,
}

pub type SendOutcome = Result<(), SendFailure>;

/// Bulk push delivery.
///
/// `send_bulk` returns one outcome per message, in input order. An `Err` from
/// the call itself means the whole batch failed transiently and may be
/// retried as a unit.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send_bulk(&self, messages: &[PushMessage]) -> AppResult<Vec<SendOutcome>>;
}

/// Classify a delivery error: credential-level rejections are permanent,
/// everything else is worth retrying.
fn is_invalid_credential_error(status: Option<u16>, body: &str) -> bool {
    if matches!(status, Some(404) | Some(410)) {
        return true;
    }
    let b = body.to_lowercase();
    b.contains("unregistered") || b.contains("invalid_argument") || b.contains("invalid registration")
}

/// HTTP push transport speaking an FCM-style per-message send API.
pub struct HttpPushTransport {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    chunk_size: usize,
}

impl HttpPushTransport {
    pub fn new(config: &PushConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
            chunk_size: config.send_chunk_size.max(1),
        }
    }

    async fn send_one(&self, message: &PushMessage) -> SendOutcome {
        let payload = json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let body = response.text().await.unwrap_or_default();
                Err(SendFailure {
                    permanent: is_invalid_credential_error(Some(status.as_u16()), &body),
                    message: format!("Push API error ({}): {}", status, body),
                })
            }
            Err(e) => Err(SendFailure {
                permanent: false,
                message: format!("Push request failed: {}", e),
            }),
        }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send_bulk(&self, messages: &[PushMessage]) -> AppResult<Vec<SendOutcome>> {
        if self.auth_token.is_none() {
            return Err(AppError::ServiceUnavailable(
                "Push transport not configured (PUSH_AUTH_TOKEN missing)".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(messages.len());
        for chunk in messages.chunks(self.chunk_size) {
            let results =
                futures::future::join_all(chunk.iter().map(|m| self.send_one(m))).await;
            outcomes.extend(results);
        }

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            tracing::warn!(
                "Bulk push: {}/{} sends failed",
                failed,
                outcomes.len()
            );
        }

        Ok(outcomes)
    }
}
