//! LLM-backed provider speaking the OpenAI chat-completions protocol.
//!
//! The prompt carries evidence only, never free-form user input, and the
//! system message forbids destructive commands. The response is parsed
//! leniently: risk is normalized, confidence clamped, anything
//! unparseable is an error and the engine falls back to the mock.

use super::{ProviderError, Recommendation, RecommendProvider};
use crate::config::LlmConfig;
use crate::model::{Evidence, Hypothesis, IncidentType, RecommendedAction, Risk};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are a cautious SRE advisor. \
Never output destructive commands (delete, wipe, drop, scale-to-zero). \
Prefer safe, read-only investigation steps first (kubectl get/describe/logs). \
Return only JSON that matches the requested schema.";

/// Evidence items beyond this count add noise, not signal.
const MAX_EVIDENCE_ITEMS: usize = 15;

pub struct LlmProvider {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    max_retries: u32,
}

impl LlmProvider {
    /// Build the provider when configured, None when the config selects
    /// the mock or is missing its key.
    pub fn from_config(cfg: &LlmConfig, request_timeout: Duration) -> Option<LlmProvider> {
        if cfg.provider != "openai" {
            return None;
        }
        let api_key = match &cfg.api_key {
            Some(key) => key.clone(),
            None => {
                warn!("llm provider selected but no api key configured, using mock");
                return None;
            }
        };
        let client = Client::builder().timeout(request_timeout).build().ok()?;
        Some(LlmProvider {
            client,
            api_url: cfg.api_url.clone(),
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            max_retries: cfg.max_retries,
        })
    }
}

#[async_trait]
impl RecommendProvider for LlmProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn recommend(
        &self,
        evidence: &[Evidence],
        incident_type: IncidentType,
    ) -> Result<Recommendation, ProviderError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(evidence, incident_type)},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
        });

        let mut last_error = ProviderError::Request("no attempts made".into());
        for attempt in 0..=self.max_retries {
            match self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp
                        .json()
                        .await
                        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                    let content = body
                        .pointer("/choices/0/message/content")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            ProviderError::InvalidResponse("missing message content".into())
                        })?;
                    return parse_response(content);
                }
                Ok(resp) => {
                    last_error =
                        ProviderError::Request(format!("status {}", resp.status().as_u16()));
                    warn!(attempt, status = resp.status().as_u16(), "llm request rejected");
                }
                Err(err) => {
                    last_error = ProviderError::Request(err.to_string());
                    warn!(attempt, error = %err, "llm request failed");
                }
            }
        }
        Err(last_error)
    }
}

fn build_prompt(evidence: &[Evidence], incident_type: IncidentType) -> String {
    let lines: Vec<String> = evidence
        .iter()
        .take(MAX_EVIDENCE_ITEMS)
        .map(|e| format!("- [{}] {}", e.source, e.detail))
        .collect();
    format!(
        "Summarize the incident and propose safe, read-only remediation steps. \
Do not suggest destructive commands. Prefer kubectl get/describe/logs first. \
Provide JSON with keys: root_cause_hypotheses (list of {{hypothesis, confidence}}), \
recommended_actions (list of {{action, risk, confidence}}). \
risk must be one of low, medium, high; confidence must be between 0 and 1.\n\
Incident type: {}\nEvidence:\n{}",
        incident_type,
        lines.join("\n")
    )
}

/// Parse the constrained JSON response, tolerating prose around the object.
fn parse_response(content: &str) -> Result<Recommendation, ProviderError> {
    let data: Value = serde_json::from_str(extract_json(content))
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    let hypotheses = data
        .pointer("/root_cause_hypotheses")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Hypothesis {
                        hypothesis: item.pointer("/hypothesis")?.as_str()?.to_string(),
                        confidence: clamp_confidence(item.pointer("/confidence")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let actions: Vec<RecommendedAction> = data
        .pointer("/recommended_actions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(RecommendedAction {
                        action: item.pointer("/action")?.as_str()?.to_string(),
                        risk: normalize_risk(item.pointer("/risk")),
                        confidence: clamp_confidence(item.pointer("/confidence")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if actions.is_empty() {
        return Err(ProviderError::InvalidResponse("no recommended actions".into()));
    }
    Ok(Recommendation { hypotheses, actions })
}

fn extract_json(content: &str) -> &str {
    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    }
}

fn normalize_risk(value: Option<&Value>) -> Risk {
    match value.and_then(|v| v.as_str()).map(|s| s.to_lowercase()).as_deref() {
        Some("medium") => Risk::Medium,
        Some("high") => Risk::High,
        _ => Risk::Low,
    }
}

fn clamp_confidence(value: Option<&Value>) -> f64 {
    value
        .and_then(|v| v.as_f64())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_response() {
        let rec = parse_response(
            r#"{"root_cause_hypotheses": [{"hypothesis": "bad image", "confidence": 0.7}],
                "recommended_actions": [{"action": "check rollout", "risk": "low", "confidence": 0.6}]}"#,
        )
        .unwrap();
        assert_eq!(rec.hypotheses.len(), 1);
        assert_eq!(rec.actions.len(), 1);
        assert_eq!(rec.actions[0].risk, Risk::Low);
    }

    #[test]
    fn tolerates_prose_around_json() {
        let rec = parse_response(
            r#"Here is the analysis: {"recommended_actions": [{"action": "a", "risk": "HIGH", "confidence": 2.0}]} done"#,
        )
        .unwrap();
        assert_eq!(rec.actions[0].risk, Risk::High);
        assert_eq!(rec.actions[0].confidence, 1.0);
    }

    #[test]
    fn empty_actions_is_an_error_so_the_engine_falls_back() {
        assert!(parse_response(r#"{"recommended_actions": []}"#).is_err());
        assert!(parse_response("not json at all").is_err());
    }

    #[test]
    fn unknown_risk_normalizes_to_low() {
        let rec = parse_response(
            r#"{"recommended_actions": [{"action": "a", "risk": "catastrophic", "confidence": 0.5}]}"#,
        )
        .unwrap();
        assert_eq!(rec.actions[0].risk, Risk::Low);
    }

    #[test]
    fn missing_confidence_defaults_midrange() {
        let rec = parse_response(r#"{"recommended_actions": [{"action": "a", "risk": "low"}]}"#)
            .unwrap();
        assert_eq!(rec.actions[0].confidence, 0.4);
    }

    #[test]
    fn prompt_is_evidence_only_and_bounded() {
        let evidence: Vec<Evidence> = (0..30)
            .map(|i| {
                crate::model::Evidence::info(
                    crate::model::SourceKind::KubernetesPods,
                    format!("item-{}", i),
                )
            })
            .collect();
        let prompt = build_prompt(&evidence, IncidentType::Crashloop);
        assert!(prompt.contains("item-14"));
        assert!(!prompt.contains("item-15"));
        assert!(prompt.contains("read-only"));
    }
}
