//! Concurrent fan-out over all registered evidence sources.
//!
//! Output ordering is deterministic for a given source set: groups follow
//! registration order, items within a group follow collection order. A
//! timed-out or failed source contributes nothing and flips the degraded
//! flag; it never fails the stage.

use super::{Collected, EvidenceSource};
use crate::model::{Evidence, SourceKind};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct Aggregator {
    sources: Vec<Arc<dyn EvidenceSource>>,
    per_source_timeout: Duration,
}

/// Merged result of one Investigate fan-out.
#[derive(Debug, Default)]
pub struct Aggregated {
    pub evidence: Vec<Evidence>,
    pub links: Vec<String>,
    pub degraded: bool,
    /// Sources that timed out or errored, in registration order.
    pub failed_sources: Vec<(SourceKind, String)>,
}

impl Aggregator {
    pub fn new(per_source_timeout: Duration) -> Self {
        Aggregator { sources: Vec::new(), per_source_timeout }
    }

    pub fn register(&mut self, source: Arc<dyn EvidenceSource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fan out to every source concurrently, one task per source, each
    /// bounded by the per-source timeout. The caller bounds the whole call
    /// with the outer stage timeout.
    pub async fn collect_all(&self, namespace: &str, workload: Option<&str>) -> Aggregated {
        let timeout = self.per_source_timeout;
        let futures = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let namespace = namespace.to_string();
            let workload = workload.map(|w| w.to_string());
            async move {
                let kind = source.kind();
                match tokio::time::timeout(
                    timeout,
                    source.collect(&namespace, workload.as_deref(), timeout),
                )
                .await
                {
                    Ok(Ok(collected)) => Ok(collected),
                    Ok(Err(err)) => {
                        warn!(source = %kind, error = %err, "evidence source failed");
                        Err((kind, err.to_string()))
                    }
                    Err(_) => {
                        warn!(source = %kind, timeout_ms = timeout.as_millis() as u64,
                            "evidence source timed out");
                        Err((kind, format!("timed out after {}ms", timeout.as_millis())))
                    }
                }
            }
        });

        // join_all preserves input order, so the merge below groups output
        // by source registration order regardless of arrival time.
        let results: Vec<Result<Collected, (SourceKind, String)>> = join_all(futures).await;

        let mut merged = Aggregated::default();
        for result in results {
            match result {
                Ok(collected) => {
                    merged.evidence.extend(collected.evidence);
                    merged.links.extend(collected.links);
                }
                Err(failure) => {
                    merged.degraded = true;
                    merged.failed_sources.push(failure);
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use crate::model::EvidenceSeverity;
    use async_trait::async_trait;

    struct FixedSource {
        kind: SourceKind,
        details: Vec<&'static str>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl EvidenceSource for FixedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn collect(
            &self,
            _namespace: &str,
            _workload: Option<&str>,
            _timeout: Duration,
        ) -> Result<Collected, ClusterError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ClusterError::Status(500));
            }
            Ok(Collected {
                evidence: self
                    .details
                    .iter()
                    .map(|d| Evidence::info(self.kind, *d))
                    .collect(),
                links: Vec::new(),
            })
        }
    }

    fn aggregator_with(sources: Vec<FixedSource>) -> Aggregator {
        let mut aggregator = Aggregator::new(Duration::from_millis(100));
        for source in sources {
            aggregator.register(Arc::new(source));
        }
        aggregator
    }

    #[tokio::test]
    async fn merge_follows_registration_order_not_arrival() {
        // The first source finishes last; its group must still come first.
        let aggregator = aggregator_with(vec![
            FixedSource {
                kind: SourceKind::KubernetesPods,
                details: vec!["pods-1", "pods-2"],
                delay: Duration::from_millis(50),
                fail: false,
            },
            FixedSource {
                kind: SourceKind::KubernetesEvents,
                details: vec!["events-1"],
                delay: Duration::from_millis(0),
                fail: false,
            },
        ]);

        let merged = aggregator.collect_all("ns-a", None).await;
        assert!(!merged.degraded);
        let details: Vec<&str> = merged.evidence.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["pods-1", "pods-2", "events-1"]);
    }

    #[tokio::test]
    async fn slow_source_times_out_and_degrades() {
        let aggregator = aggregator_with(vec![
            FixedSource {
                kind: SourceKind::Logs,
                details: vec!["never-arrives"],
                delay: Duration::from_secs(5),
                fail: false,
            },
            FixedSource {
                kind: SourceKind::KubernetesPods,
                details: vec!["pods-ok"],
                delay: Duration::from_millis(0),
                fail: false,
            },
        ]);

        let merged = aggregator.collect_all("ns-a", None).await;
        assert!(merged.degraded);
        assert_eq!(merged.failed_sources.len(), 1);
        assert_eq!(merged.failed_sources[0].0, SourceKind::Logs);
        assert_eq!(merged.evidence.len(), 1);
        assert_eq!(merged.evidence[0].detail, "pods-ok");
    }

    #[tokio::test]
    async fn erroring_source_yields_zero_evidence_not_failure() {
        let aggregator = aggregator_with(vec![FixedSource {
            kind: SourceKind::KubernetesDeployments,
            details: vec![],
            delay: Duration::from_millis(0),
            fail: true,
        }]);

        let merged = aggregator.collect_all("ns-a", None).await;
        assert!(merged.degraded);
        assert!(merged.evidence.is_empty());
        assert!(merged.failed_sources[0].1.contains("500"));
    }

    #[tokio::test]
    async fn evidence_severity_survives_merge() {
        let mut aggregator = Aggregator::new(Duration::from_millis(100));
        struct WarnSource;
        #[async_trait]
        impl EvidenceSource for WarnSource {
            fn kind(&self) -> SourceKind {
                SourceKind::KubernetesPods
            }
            async fn collect(
                &self,
                _namespace: &str,
                _workload: Option<&str>,
                _timeout: Duration,
            ) -> Result<Collected, ClusterError> {
                Ok(Collected {
                    evidence: vec![Evidence::warning(SourceKind::KubernetesPods, "restarts=3")],
                    links: vec!["kubectl get pods -n ns-a".into()],
                })
            }
        }
        aggregator.register(Arc::new(WarnSource));

        let merged = aggregator.collect_all("ns-a", Some("app-a")).await;
        assert_eq!(merged.evidence[0].severity, EvidenceSeverity::Warning);
        assert_eq!(merged.links.len(), 1);
    }
}
