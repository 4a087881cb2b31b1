//! Warning-events evidence source: the last few Warning events in the
//! namespace, which usually name the failure outright (BackOff, Failed,
//! Unhealthy).

use super::{Collected, EvidenceSource};
use crate::cluster::{ClusterClient, ClusterError};
use crate::model::{Evidence, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Only the tail of the event list is kept; older events are noise.
const EVENT_WINDOW: usize = 20;

pub struct EventSource {
    client: Arc<dyn ClusterClient>,
}

impl EventSource {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EvidenceSource for EventSource {
    fn kind(&self) -> SourceKind {
        SourceKind::KubernetesEvents
    }

    async fn collect(
        &self,
        namespace: &str,
        _workload: Option<&str>,
        _timeout: Duration,
    ) -> Result<Collected, ClusterError> {
        let events = self.client.list_events(namespace).await?;
        let mut out = Collected::default();

        let start = events.len().saturating_sub(EVENT_WINDOW);
        for event in &events[start..] {
            if event.kind == "Warning" {
                out.evidence.push(Evidence::warning(
                    SourceKind::KubernetesEvents,
                    format!("Event {}: {}", event.reason, event.message),
                ));
            }
        }

        out.links
            .push(format!("kubectl get events -n {} --sort-by=.lastTimestamp", namespace));
        Ok(out)
    }
}
