use crate::cluster::ClusterClient;
use crate::config::DemoWorkload;
use crate::pipeline::orchestrator::Orchestrator;
use crate::store::IncidentStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: IncidentStore,
    pub orchestrator: Arc<Orchestrator>,
    pub cluster: Arc<dyn ClusterClient>,
    pub demo_workloads: Vec<DemoWorkload>,
}
