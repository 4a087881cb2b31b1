//! Read-only cluster access -- the trait every evidence source talks to.
//!
//! The responder holds no write-capable credentials. Everything here maps
//! to `kubectl get` / `kubectl logs` equivalents.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster api request failed: {0}")]
    Request(String),

    #[error("cluster api returned status {0}")]
    Status(u16),

    #[error("cluster response decode failed: {0}")]
    Decode(String),

    #[error("cluster credentials not configured: {0}")]
    NotConfigured(String),
}

/// Condensed pod view: enough for crash/backoff evidence.
#[derive(Debug, Clone, Default)]
pub struct PodView {
    pub name: String,
    pub phase: String,
    pub restarts: u32,
    pub waiting_reason: Option<String>,
    /// Containers that have restarted at least once; log-tail candidates.
    pub restarting_containers: Vec<String>,
}

/// Condensed deployment view.
#[derive(Debug, Clone, Default)]
pub struct DeploymentView {
    pub name: String,
    pub desired: i64,
    pub ready: i64,
    pub available: i64,
    /// (condition type, message) pairs with status == False.
    pub failed_conditions: Vec<(String, String)>,
}

/// Condensed namespace event.
#[derive(Debug, Clone)]
pub struct EventView {
    /// "Normal" or "Warning".
    pub kind: String,
    pub reason: String,
    pub message: String,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodView>, ClusterError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentView>, ClusterError>;

    async fn list_events(&self, namespace: &str) -> Result<Vec<EventView>, ClusterError>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: u32,
    ) -> Result<String, ClusterError>;
}

/// Stand-in when no cluster access is configured. Every call errors, so
/// evidence sources degrade instead of the process refusing to start.
pub struct UnconfiguredClusterClient;

#[async_trait]
impl ClusterClient for UnconfiguredClusterClient {
    async fn list_pods(&self, _namespace: &str) -> Result<Vec<PodView>, ClusterError> {
        Err(self.not_configured())
    }

    async fn list_deployments(
        &self,
        _namespace: &str,
    ) -> Result<Vec<DeploymentView>, ClusterError> {
        Err(self.not_configured())
    }

    async fn list_events(&self, _namespace: &str) -> Result<Vec<EventView>, ClusterError> {
        Err(self.not_configured())
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        _tail_lines: u32,
    ) -> Result<String, ClusterError> {
        Err(self.not_configured())
    }
}

impl UnconfiguredClusterClient {
    fn not_configured(&self) -> ClusterError {
        ClusterError::NotConfigured("no cluster.api_url and not running in-cluster".to_string())
    }
}
