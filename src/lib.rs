//! sremedic -- agentic, read-only SRE incident responder for Kubernetes.
//!
//! This crate provides the staged incident pipeline (triage, investigate,
//! recommend, validate), read-only Kubernetes evidence sources, a pluggable
//! recommendation engine with a deterministic fallback, and the REST API
//! that drives it all.

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod investigate;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod recommend;
pub mod store;

use crate::api::state::AppState;
use crate::cluster::http::HttpClusterClient;
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::investigate::{Aggregator, DeploymentSource, EventSource, LogTailSource, PodStatusSource};
use crate::notify::Notifier;
use crate::pipeline::orchestrator::{Orchestrator, RunSettings};
use crate::recommend::llm::LlmProvider;
use crate::recommend::{RecommendProvider, RecommendationEngine};
use crate::store::IncidentStore;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Wired application components, shared by the daemon and the CLI
/// one-shot commands.
pub struct Runtime {
    pub store: IncidentStore,
    pub orchestrator: Arc<Orchestrator>,
    pub cluster: Arc<dyn ClusterClient>,
}

/// Wire store, evidence sources, recommendation engine and orchestrator
/// from configuration.
pub fn build_runtime(cfg: &Config) -> Result<Runtime> {
    let store = IncidentStore::open(&cfg.db_path)
        .with_context(|| format!("opening database at {}", cfg.db_path))?;

    let cluster: Arc<dyn ClusterClient> = match HttpClusterClient::from_config(&cfg.cluster) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::warn!(error = %err, "cluster access unavailable; evidence sources will degrade");
            Arc::new(cluster::UnconfiguredClusterClient)
        }
    };

    let mut aggregator = Aggregator::new(cfg.timeouts.per_source());
    aggregator.register(Arc::new(PodStatusSource::new(Arc::clone(&cluster))));
    aggregator.register(Arc::new(DeploymentSource::new(Arc::clone(&cluster))));
    aggregator.register(Arc::new(EventSource::new(Arc::clone(&cluster))));
    aggregator.register(Arc::new(LogTailSource::new(
        Arc::clone(&cluster),
        cfg.cluster.log_tail_lines,
    )));
    tracing::info!(sources = aggregator.source_count(), "evidence sources registered");

    let provider: Option<Arc<dyn RecommendProvider>> =
        LlmProvider::from_config(&cfg.llm, cfg.timeouts.llm_request())
            .map(|p| Arc::new(p) as Arc<dyn RecommendProvider>);
    let engine = Arc::new(RecommendationEngine::new(provider, cfg.timeouts.recommend()));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(aggregator),
        engine,
        Notifier::new(cfg.notify_webhook_url.clone()),
        RunSettings::from_config(cfg),
    ));

    Ok(Runtime { store, orchestrator, cluster })
}

/// Start the daemon: wire the runtime and serve the API.
pub async fn serve(cfg: Config) -> Result<()> {
    tracing::info!(db_path = %cfg.db_path, "initializing database");
    let runtime = build_runtime(&cfg)?;

    let state = AppState {
        store: runtime.store,
        orchestrator: runtime.orchestrator,
        cluster: runtime.cluster,
        demo_workloads: cfg.demo_workloads.clone(),
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = cfg.bind.parse().context("parsing bind address")?;
    tracing::info!(%addr, "sremedic listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
