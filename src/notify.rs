//! Notification collaborator — optional push delivery.

use async_trait::async_trait;

use crate::error::NotifyError;

/// Push notification sender.
///
/// Returns whether the push was accepted. Failures are reported, never
/// fatal — callers log and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_push(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> Result<bool, NotifyError>;
}

/// Webhook-backed notifier: POSTs a JSON payload to a configured endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_push(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> Result<bool, NotifyError> {
        let payload = serde_json::json!({
            "user_id": user_id,
            "title": title,
            "body": body,
            "data": data.unwrap_or(serde_json::Value::Null),
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if response.status().is_success() {
            tracing::debug!(user = user_id, title, "Push delivered");
            Ok(true)
        } else {
            tracing::warn!(
                user = user_id,
                status = %response.status(),
                "Push endpoint rejected notification"
            );
            Ok(false)
        }
    }
}
