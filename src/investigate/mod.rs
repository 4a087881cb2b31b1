//! Evidence collection -- capability-polymorphic sources and the
//! fan-out aggregator that runs them during the Investigate stage.

pub mod aggregator;
pub mod deployments;
pub mod events;
pub mod logs;
pub mod pods;

pub use aggregator::{Aggregated, Aggregator};
pub use deployments::DeploymentSource;
pub use events::EventSource;
pub use logs::LogTailSource;
pub use pods::PodStatusSource;

use crate::cluster::ClusterError;
use crate::model::{Evidence, SourceKind};
use async_trait::async_trait;
use std::time::Duration;

/// Output of one source: evidence plus kubectl links for the human.
#[derive(Debug, Default)]
pub struct Collected {
    pub evidence: Vec<Evidence>,
    pub links: Vec<String>,
}

/// A read-only collector of evidence from one data source.
///
/// New sources register with the [`Aggregator`]; the aggregator itself
/// never changes when a source is added.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn collect(
        &self,
        namespace: &str,
        workload: Option<&str>,
        timeout: Duration,
    ) -> Result<Collected, ClusterError>;
}
