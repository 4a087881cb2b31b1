//! Pod-status evidence source: phases, restart counts, waiting reasons.

use super::{Collected, EvidenceSource};
use crate::cluster::{ClusterClient, ClusterError};
use crate::model::{Evidence, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct PodStatusSource {
    client: Arc<dyn ClusterClient>,
}

impl PodStatusSource {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EvidenceSource for PodStatusSource {
    fn kind(&self) -> SourceKind {
        SourceKind::KubernetesPods
    }

    async fn collect(
        &self,
        namespace: &str,
        _workload: Option<&str>,
        _timeout: Duration,
    ) -> Result<Collected, ClusterError> {
        let pods = self.client.list_pods(namespace).await?;
        let mut out = Collected::default();

        for pod in &pods {
            let detail = format!(
                "Pod {} status={} restarts={} reason={}",
                pod.name,
                pod.phase,
                pod.restarts,
                pod.waiting_reason.as_deref().unwrap_or("none"),
            );
            let suspicious = pod.restarts > 0 || pod.waiting_reason.is_some();
            out.evidence.push(if suspicious {
                Evidence::warning(SourceKind::KubernetesPods, detail)
            } else {
                Evidence::info(SourceKind::KubernetesPods, detail)
            });
        }

        if pods.is_empty() {
            out.evidence.push(Evidence::info(
                SourceKind::KubernetesPods,
                format!("No pods found in namespace {}", namespace),
            ));
        }

        out.links.push(format!("kubectl get pods -n {}", namespace));
        Ok(out)
    }
}
