//! Log-tail evidence source: fetches the tail of every container that has
//! restarted, keeping the last few lines as evidence.

use super::{Collected, EvidenceSource};
use crate::cluster::{ClusterClient, ClusterError};
use crate::model::{Evidence, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const SNIPPET_LINES: usize = 3;

pub struct LogTailSource {
    client: Arc<dyn ClusterClient>,
    tail_lines: u32,
}

impl LogTailSource {
    pub fn new(client: Arc<dyn ClusterClient>, tail_lines: u32) -> Self {
        Self { client, tail_lines }
    }
}

#[async_trait]
impl EvidenceSource for LogTailSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Logs
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
            for container in &pod.restarting_containers {
                match self
                    .client
                    .pod_logs(namespace, &pod.name, container, self.tail_lines)
                    .await
                {
                    Ok(log) => {
                        let lines: Vec<&str> = log.lines().collect();
                        let start = lines.len().saturating_sub(SNIPPET_LINES);
                        let snippet = lines[start..].join(" ");
                        out.evidence.push(Evidence::warning(
                            SourceKind::Logs,
                            format!("Logs {}/{}: {}", pod.name, container, snippet),
                        ));
                        out.links.push(format!(
                            "kubectl logs {} -c {} -n {} --tail={}",
                            pod.name, container, namespace, self.tail_lines
                        ));
                    }
                    Err(err) => {
                        // One unreadable container should not hide the rest.
                        out.evidence.push(Evidence::error(
                            SourceKind::Logs,
                            format!("Failed to read logs for {}/{}: {}", pod.name, container, err),
                        ));
                    }
                }
            }
        }

        Ok(out)
    }
}
