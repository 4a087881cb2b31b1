//! Recommendation engine -- pluggable hypothesis/action providers with a
//! mandatory deterministic mock fallback.

pub mod llm;
pub mod mock;

use crate::model::{Evidence, Hypothesis, IncidentType, RecommendedAction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider response invalid: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct Recommendation {
    pub hypotheses: Vec<Hypothesis>,
    pub actions: Vec<RecommendedAction>,
}

/// A hypothesis/action generator. Implementations must be read-only
/// advisors; the engine clamps anything out of range rather than failing.
#[async_trait]
pub trait RecommendProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recommend(
        &self,
        evidence: &[Evidence],
        incident_type: IncidentType,
    ) -> Result<Recommendation, ProviderError>;
}

/// What the Recommend stage gets back: the recommendation, which provider
/// actually produced it, and whether the configured provider had to be
/// replaced by the mock.
#[derive(Debug)]
pub struct EngineOutput {
    pub recommendation: Recommendation,
    pub provider: &'static str,
    pub degraded: bool,
}

pub struct RecommendationEngine {
    provider: Option<Arc<dyn RecommendProvider>>,
    mock: mock::MockProvider,
    timeout: Duration,
}

impl RecommendationEngine {
    pub fn new(provider: Option<Arc<dyn RecommendProvider>>, timeout: Duration) -> Self {
        RecommendationEngine { provider, mock: mock::MockProvider, timeout }
    }

    /// Run the active provider under the stage timeout. On timeout, error
    /// or empty output, fall back synchronously to the mock -- the failed
    /// provider is never retried within the run.
    pub async fn recommend(
        &self,
        evidence: &[Evidence],
        incident_type: IncidentType,
    ) -> EngineOutput {
        if let Some(provider) = &self.provider {
            info!(provider = provider.name(), "recommendation provider selected");
            match tokio::time::timeout(self.timeout, provider.recommend(evidence, incident_type))
                .await
            {
                Ok(Ok(rec)) if !rec.actions.is_empty() => {
                    return EngineOutput {
                        recommendation: clamp(rec),
                        provider: provider.name(),
                        degraded: false,
                    };
                }
                Ok(Ok(_)) => {
                    warn!(provider = provider.name(), "provider returned no actions, falling back");
                }
                Ok(Err(err)) => {
                    warn!(provider = provider.name(), error = %err, "provider failed, falling back");
                }
                Err(_) => {
                    warn!(provider = provider.name(), timeout_ms = self.timeout.as_millis() as u64,
                        "provider timed out, falling back");
                }
            }
            let rec = self
                .mock
                .recommend(evidence, incident_type)
                .await
                .unwrap_or_default();
            return EngineOutput { recommendation: clamp(rec), provider: "mock", degraded: true };
        }

        // No real provider configured: the mock is the active provider,
        // not a degradation.
        let rec = self
            .mock
            .recommend(evidence, incident_type)
            .await
            .unwrap_or_default();
        EngineOutput { recommendation: clamp(rec), provider: "mock", degraded: false }
    }
}

/// Confidence values must lie in [0,1]; out-of-range provider output is
/// clamped, never rejected.
fn clamp(mut rec: Recommendation) -> Recommendation {
    for hypothesis in &mut rec.hypotheses {
        hypothesis.confidence = hypothesis.confidence.clamp(0.0, 1.0);
    }
    for action in &mut rec.actions {
        action.confidence = action.confidence.clamp(0.0, 1.0);
    }
    rec
}
