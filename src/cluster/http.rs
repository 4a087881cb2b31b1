//! reqwest-backed Kubernetes API client.
//!
//! Talks plain REST (`/api/v1`, `/apis/apps/v1`) with a bearer token, the
//! same way the in-cluster service account does. Only GET endpoints.

use super::{ClusterClient, ClusterError, DeploymentView, EventView, PodView};
use crate::config::ClusterConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const IN_CLUSTER_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

pub struct HttpClusterClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClusterClient {
    pub fn from_config(cfg: &ClusterConfig) -> Result<Self, ClusterError> {
        let base_url = match &cfg.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
                    ClusterError::NotConfigured(
                        "no cluster.api_url and KUBERNETES_SERVICE_HOST unset".to_string(),
                    )
                })?;
                let port = std::env::var("KUBERNETES_SERVICE_PORT")
                    .unwrap_or_else(|_| "443".to_string());
                format!("https://{}:{}", host, port)
            }
        };

        let token_path = cfg
            .token_path
            .clone()
            .unwrap_or_else(|| IN_CLUSTER_TOKEN_PATH.to_string());
        let token = std::fs::read_to_string(&token_path)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .map_err(|e| ClusterError::Request(e.to_string()))?;

        Ok(HttpClusterClient { client, base_url, token })
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClusterError> {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ClusterError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ClusterError::Status(resp.status().as_u16()));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))
    }

    async fn get_text(&self, path: &str) -> Result<String, ClusterError> {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ClusterError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ClusterError::Status(resp.status().as_u16()));
        }
        resp.text()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodView>, ClusterError> {
        let body = self
            .get_json(&format!("/api/v1/namespaces/{}/pods", namespace))
            .await?;
        Ok(items(&body).iter().map(parse_pod).collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentView>, ClusterError> {
        let body = self
            .get_json(&format!("/apis/apps/v1/namespaces/{}/deployments", namespace))
            .await?;
        Ok(items(&body).iter().map(parse_deployment).collect())
    }

    async fn list_events(&self, namespace: &str) -> Result<Vec<EventView>, ClusterError> {
        let body = self
            .get_json(&format!("/api/v1/namespaces/{}/events", namespace))
            .await?;
        Ok(items(&body)
            .iter()
            .map(|item| EventView {
                kind: str_at(item, "/type").unwrap_or_else(|| "Normal".to_string()),
                reason: str_at(item, "/reason").unwrap_or_default(),
                message: str_at(item, "/message").unwrap_or_default(),
            })
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: u32,
    ) -> Result<String, ClusterError> {
        self.get_text(&format!(
            "/api/v1/namespaces/{}/pods/{}/log?container={}&tailLines={}",
            namespace, pod, container, tail_lines
        ))
        .await
    }
}

fn items(body: &Value) -> Vec<Value> {
    body.pointer("/items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn parse_pod(item: &Value) -> PodView {
    let name = str_at(item, "/metadata/name").unwrap_or_default();
    let phase = str_at(item, "/status/phase").unwrap_or_else(|| "Unknown".to_string());
    let mut restarts = 0u32;
    let mut waiting_reason = None;
    let mut restarting_containers = Vec::new();

    if let Some(statuses) = item.pointer("/status/containerStatuses").and_then(|v| v.as_array()) {
        for status in statuses {
            let count = status
                .pointer("/restartCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            restarts += count;
            if count > 0 {
                if let Some(container) = str_at(status, "/name") {
                    restarting_containers.push(container);
                }
            }
            if waiting_reason.is_none() {
                waiting_reason = str_at(status, "/state/waiting/reason");
            }
        }
    }

    PodView { name, phase, restarts, waiting_reason, restarting_containers }
}

fn parse_deployment(item: &Value) -> DeploymentView {
    let name = str_at(item, "/metadata/name").unwrap_or_default();
    let desired = item.pointer("/spec/replicas").and_then(|v| v.as_i64()).unwrap_or(0);
    let ready = item.pointer("/status/readyReplicas").and_then(|v| v.as_i64()).unwrap_or(0);
    let available = item
        .pointer("/status/availableReplicas")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let mut failed_conditions = Vec::new();
    if let Some(conditions) = item.pointer("/status/conditions").and_then(|v| v.as_array()) {
        for condition in conditions {
            if str_at(condition, "/status").as_deref() == Some("False") {
                failed_conditions.push((
                    str_at(condition, "/type").unwrap_or_default(),
                    str_at(condition, "/message").unwrap_or_default(),
                ));
            }
        }
    }
    DeploymentView { name, desired, ready, available, failed_conditions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_pod_counts_restarts_across_containers() {
        let pod = parse_pod(&json!({
            "metadata": {"name": "app-a-1"},
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"name": "app", "restartCount": 3,
                     "state": {"waiting": {"reason": "CrashLoopBackOff"}}},
                    {"name": "sidecar", "restartCount": 1}
                ]
            }
        }));
        assert_eq!(pod.restarts, 4);
        assert_eq!(pod.waiting_reason.as_deref(), Some("CrashLoopBackOff"));
        assert_eq!(pod.restarting_containers, vec!["app", "sidecar"]);
    }

    #[test]
    fn parse_deployment_collects_false_conditions() {
        let deployment = parse_deployment(&json!({
            "metadata": {"name": "app-b"},
            "spec": {"replicas": 2},
            "status": {
                "readyReplicas": 1,
                "availableReplicas": 1,
                "conditions": [
                    {"type": "Available", "status": "False", "message": "not enough replicas"},
                    {"type": "Progressing", "status": "True", "message": "ok"}
                ]
            }
        }));
        assert_eq!(deployment.desired, 2);
        assert_eq!(deployment.available, 1);
        assert_eq!(deployment.failed_conditions.len(), 1);
        assert_eq!(deployment.failed_conditions[0].0, "Available");
    }
}
