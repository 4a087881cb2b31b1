//! Optional outbound webhook notifications (Slack-compatible payload).
//!
//! Disabled when no URL is configured. Failures are logged and dropped;
//! notification is never on the pipeline's critical path.

use crate::model::Incident;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct Notifier {
    webhook_url: Option<String>,
    client: Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Notifier { webhook_url, client }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn incident_created(&self, incident: &Incident) {
        self.post(format!(
            ":rotating_light: Incident {} ({}, {}) created: {}",
            incident.incident_id, incident.incident_type, incident.severity, incident.summary
        ))
        .await;
    }

    pub async fn recommendation_ready(&self, incident: &Incident) {
        self.post(format!(
            ":bulb: Incident {}: {} recommended action(s) ready",
            incident.incident_id,
            incident.recommended_actions.len()
        ))
        .await;
    }

    pub async fn run_finished(&self, incident: &Incident) {
        self.post(format!(
            ":white_check_mark: Incident {} finished with status {}",
            incident.incident_id, incident.status
        ))
        .await;
    }

    async fn post(&self, text: String) {
        let Some(url) = &self.webhook_url else {
            return;
        };
        if let Err(err) = self.client.post(url).json(&json!({ "text": text })).send().await {
            warn!(error = %err, "webhook notification failed");
        }
    }
}
