//! Deployment-conditions evidence source: replica gaps and False conditions.

use super::{Collected, EvidenceSource};
use crate::cluster::{ClusterClient, ClusterError};
use crate::model::{Evidence, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct DeploymentSource {
    client: Arc<dyn ClusterClient>,
}

impl DeploymentSource {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EvidenceSource for DeploymentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::KubernetesDeployments
    }

    async fn collect(
        &self,
        namespace: &str,
        workload: Option<&str>,
        _timeout: Duration,
    ) -> Result<Collected, ClusterError> {
        let deployments = self.client.list_deployments(namespace).await?;
        let mut out = Collected::default();

        for deployment in &deployments {
            let detail = format!(
                "Deployment {} replicas desired={} ready={} available={}",
                deployment.name, deployment.desired, deployment.ready, deployment.available,
            );
            out.evidence.push(if deployment.available < deployment.desired {
                Evidence::warning(SourceKind::KubernetesDeployments, detail)
            } else {
                Evidence::info(SourceKind::KubernetesDeployments, detail)
            });

            for (condition, message) in &deployment.failed_conditions {
                out.evidence.push(Evidence::warning(
                    SourceKind::KubernetesDeployments,
                    format!("Deployment {} condition {}: {}", deployment.name, condition, message),
                ));
            }
        }

        out.links.push(format!("kubectl describe deployment -n {}", namespace));
        if let Some(workload) = workload {
            out.links
                .push(format!("kubectl rollout status deployment/{} -n {}", workload, namespace));
        }
        Ok(out)
    }
}
