use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

/// Classified result of one delivery to one token. Permanent failures
/// retire the token; transient ones leave it as a retry candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Unregistered,
    SenderMismatch,
    TransientError,
    OtherError,
}

impl PushOutcome {
    pub fn deactivates_token(&self) -> bool {
        matches!(
            self,
            PushOutcome::Unregistered | PushOutcome::SenderMismatch | PushOutcome::OtherError
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str, data: &JsonValue) -> PushOutcome;
}

/// FCM HTTP gateway. Delivery failures are classified from the per-token
/// error string in the response body.
pub struct FcmGateway {
    client: Client,
    endpoint: String,
    server_key: String,
}

impl FcmGateway {
    pub fn new(client: Client, endpoint: String, server_key: String) -> Self {
        Self {
            client,
            endpoint,
            server_key,
        }
    }
}

pub fn classify_fcm_error(error: &str) -> PushOutcome {
    match error {
        "NotRegistered" | "InvalidRegistration" => PushOutcome::Unregistered,
        "MismatchSenderId" => PushOutcome::SenderMismatch,
        "Unavailable" | "InternalServerError" | "DeviceMessageRateExceeded" => {
            PushOutcome::TransientError
        }
        _ => PushOutcome::OtherError,
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, token: &str, title: &str, body: &str, data: &JsonValue) -> PushOutcome {
        let payload = json!({
            "to": token,
            "notification": { "title": title, "body": body },
            "data": data,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("key={}", self.server_key),
            )
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, "push gateway unreachable");
                return PushOutcome::TransientError;
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return PushOutcome::TransientError;
        }
        if !status.is_success() {
            tracing::warn!(status = %status, "push gateway rejected request");
            return PushOutcome::OtherError;
        }

        let body_json: JsonValue = match response.json().await {
            Ok(v) => v,
            Err(_) => return PushOutcome::OtherError,
        };

        let result = body_json
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first());
        match result {
            Some(entry) if entry.get("message_id").is_some() => PushOutcome::Delivered,
            Some(entry) => {
                let error = entry.get("error").and_then(|e| e.as_str()).unwrap_or("");
                classify_fcm_error(error)
            }
            None => PushOutcome::OtherError,
        }
    }
}
