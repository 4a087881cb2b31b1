//! Deterministic rule-based provider.
//!
//! Always available as the safe fallback and the default when no real
//! provider is configured. Rules key off the incident type and the
//! evidence text only, so identical inputs always produce identical
//! output.

use super::{ProviderError, Recommendation, RecommendProvider};
use crate::model::{Evidence, Hypothesis, IncidentType, RecommendedAction, Risk};
use async_trait::async_trait;

pub struct MockProvider;

#[async_trait]
impl RecommendProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn recommend(
        &self,
        evidence: &[Evidence],
        incident_type: IncidentType,
    ) -> Result<Recommendation, ProviderError> {
        Ok(rules(evidence, incident_type))
    }
}

fn rules(evidence: &[Evidence], incident_type: IncidentType) -> Recommendation {
    let mut rec = Recommendation::default();

    let crash_signal = evidence.iter().any(|e| {
        e.detail.contains("CrashLoopBackOff") || e.detail.contains("BackOff")
    }) || incident_type == IncidentType::Crashloop;
    let image_signal = evidence.iter().any(|e| {
        e.detail.contains("ImagePullBackOff") || e.detail.contains("ErrImagePull")
    }) || incident_type == IncidentType::RolloutFailure;

    if crash_signal {
        rec.hypotheses.push(Hypothesis {
            hypothesis: "Containers are crash looping, likely a bad config or missing dependency"
                .into(),
            confidence: 0.6,
        });
        rec.actions.push(RecommendedAction {
            action: "Check logs of the restarting containers for the crash reason".into(),
            risk: Risk::Low,
            confidence: 0.6,
        });
        rec.actions.push(RecommendedAction {
            action: "Describe the affected pods and compare env/config with the last good rollout"
                .into(),
            risk: Risk::Low,
            confidence: 0.5,
        });
    }

    if image_signal {
        rec.hypotheses.push(Hypothesis {
            hypothesis: "Rollout is failing to pull or start the new image".into(),
            confidence: 0.55,
        });
        rec.actions.push(RecommendedAction {
            action: "Verify the image tag exists and image pull secrets are valid".into(),
            risk: Risk::Low,
            confidence: 0.55,
        });
        rec.actions.push(RecommendedAction {
            action: "Check rollout status and recent deployment changes".into(),
            risk: Risk::Low,
            confidence: 0.5,
        });
    }

    if incident_type == IncidentType::HighLatency {
        rec.hypotheses.push(Hypothesis {
            hypothesis: "Latency degradation from resource saturation or a recent config change"
                .into(),
            confidence: 0.5,
        });
        rec.actions.push(RecommendedAction {
            action: "Check CPU/memory usage and HPA status for the affected workload".into(),
            risk: Risk::Low,
            confidence: 0.5,
        });
        rec.actions.push(RecommendedAction {
            action: "Review recent ConfigMap and deployment changes in the namespace".into(),
            risk: Risk::Low,
            confidence: 0.45,
        });
    }

    if rec.hypotheses.is_empty() {
        rec.hypotheses.push(Hypothesis {
            hypothesis: "Recent rollout or resource pressure in the affected namespace".into(),
            confidence: 0.45,
        });
    }
    if rec.actions.is_empty() {
        rec.actions.push(RecommendedAction {
            action: "Check pod events and rollout status for the affected namespace".into(),
            risk: Risk::Low,
            confidence: 0.5,
        });
    }

    rec
}
