//! Incident data model -- the durable, append-only record of one
//! investigation, plus the request/summary DTOs exposed over the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Known incident classes. Webhook alerts with an unrecognized alertname
/// are ingested as `Alert` rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Crashloop,
    RolloutFailure,
    HighLatency,
    Alert,
}

impl IncidentType {
    /// Map an alertname label onto a known type. Never fails; unknown
    /// names become the generic `Alert` class.
    pub fn from_label(label: &str) -> Self {
        match label {
            "crashloop" => IncidentType::Crashloop,
            "rollout_failure" => IncidentType::RolloutFailure,
            "high_latency" => IncidentType::HighLatency,
            _ => IncidentType::Alert,
        }
    }

    /// Strict parse for explicit inject requests, where an unknown type is
    /// an invalid request rather than a generic alert.
    pub fn parse_strict(label: &str) -> Option<Self> {
        match label {
            "crashloop" => Some(IncidentType::Crashloop),
            "rollout_failure" => Some(IncidentType::RolloutFailure),
            "high_latency" => Some(IncidentType::HighLatency),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::Crashloop => write!(f, "crashloop"),
            IncidentType::RolloutFailure => write!(f, "rollout_failure"),
            IncidentType::HighLatency => write!(f, "high_latency"),
            IncidentType::Alert => write!(f, "alert"),
        }
    }
}

/// Incident severity. Variant order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_label(label: &str) -> Self {
        match label {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle status. Only ever advances forward, or jumps to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Received,
    Triaging,
    Investigating,
    Recommending,
    Validating,
    Validated,
    Failed,
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Validated | IncidentStatus::Failed)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Received => write!(f, "received"),
            IncidentStatus::Triaging => write!(f, "triaging"),
            IncidentStatus::Investigating => write!(f, "investigating"),
            IncidentStatus::Recommending => write!(f, "recommending"),
            IncidentStatus::Validating => write!(f, "validating"),
            IncidentStatus::Validated => write!(f, "validated"),
            IncidentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Alert,
    Triage,
    Investigate,
    Recommend,
    Validate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Alert => write!(f, "alert"),
            Stage::Triage => write!(f, "triage"),
            Stage::Investigate => write!(f, "investigate"),
            Stage::Recommend => write!(f, "recommend"),
            Stage::Validate => write!(f, "validate"),
        }
    }
}

/// Timeline entry status. `Degraded` marks a stage that completed despite
/// partial sub-task failures (source timeouts, provider fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageEventStatus {
    Started,
    Completed,
    Degraded,
    Failed,
}

impl StageEventStatus {
    /// Terminal statuses close an open stage for timing purposes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageEventStatus::Started)
    }
}

/// One append-only audit timeline entry. Never reordered or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub status: StageEventStatus,
    pub timestamp: DateTime<Utc>,
}

/// Wall-clock duration of one completed stage, derived from the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
}

/// Origin of one piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "kubernetes-pods")]
    KubernetesPods,
    #[serde(rename = "kubernetes-deployments")]
    KubernetesDeployments,
    #[serde(rename = "kubernetes-events")]
    KubernetesEvents,
    #[serde(rename = "logs")]
    Logs,
    #[serde(rename = "triage")]
    Triage,
    /// Markers recorded by the orchestrator itself: fatal errors,
    /// degraded-stage notes, cancellation.
    #[serde(rename = "pipeline")]
    Pipeline,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::KubernetesPods => write!(f, "kubernetes-pods"),
            SourceKind::KubernetesDeployments => write!(f, "kubernetes-deployments"),
            SourceKind::KubernetesEvents => write!(f, "kubernetes-events"),
            SourceKind::Logs => write!(f, "logs"),
            SourceKind::Triage => write!(f, "triage"),
            SourceKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSeverity {
    Info,
    Warning,
    Error,
}

/// Immutable once appended; the list only grows during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: SourceKind,
    pub severity: EvidenceSeverity,
    pub detail: String,
}

impl Evidence {
    pub fn info(source: SourceKind, detail: impl Into<String>) -> Self {
        Evidence { source, severity: EvidenceSeverity::Info, detail: detail.into() }
    }

    pub fn warning(source: SourceKind, detail: impl Into<String>) -> Self {
        Evidence { source, severity: EvidenceSeverity::Warning, detail: detail.into() }
    }

    pub fn error(source: SourceKind, detail: impl Into<String>) -> Self {
        Evidence { source, severity: EvidenceSeverity::Error, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Risk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Risk::Low => write!(f, "low"),
            Risk::Medium => write!(f, "medium"),
            Risk::High => write!(f, "high"),
        }
    }
}

/// Advisory only. The responder never executes actions itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action: String,
    pub risk: Risk,
    pub confidence: f64,
}

/// Full incident record. Owned exclusively by the orchestrator while a run
/// holds the incident's lease; read-shared afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub correlation_id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timeline: Vec<StageEvent>,
    pub stage_timings: Vec<StageTiming>,
    pub evidence: Vec<Evidence>,
    pub root_cause_hypotheses: Vec<Hypothesis>,
    pub recommended_actions: Vec<RecommendedAction>,
    /// kubectl commands for the human following up.
    pub links: Vec<String>,
    /// Opaque alert payload as received (labels, annotations).
    pub raw_alert: serde_json::Value,
    /// True if any stage completed degraded (partial evidence, mock fallback).
    pub degraded: bool,
}

impl Incident {
    pub fn new(
        incident_type: IncidentType,
        severity: Severity,
        summary: String,
        raw_alert: serde_json::Value,
        correlation_id: String,
    ) -> Self {
        let now = Utc::now();
        Incident {
            incident_id: Uuid::new_v4().to_string(),
            correlation_id,
            incident_type,
            severity,
            status: IncidentStatus::Received,
            summary,
            created_at: now,
            updated_at: now,
            timeline: vec![StageEvent {
                stage: Stage::Alert,
                status: StageEventStatus::Completed,
                timestamp: now,
            }],
            stage_timings: Vec::new(),
            evidence: Vec::new(),
            root_cause_hypotheses: Vec::new(),
            recommended_actions: Vec::new(),
            links: Vec::new(),
            raw_alert,
            degraded: false,
        }
    }

    /// Namespace label from the raw alert, falling back to `default`.
    pub fn namespace(&self) -> String {
        self.raw_alert
            .pointer("/labels/namespace")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string()
    }

    /// Workload hint from the alert annotations, if the sender included one.
    pub fn workload(&self) -> Option<String> {
        self.raw_alert
            .pointer("/annotations/workload")
            .and_then(|v| v.as_str())
            .filter(|w| !w.is_empty() && *w != "unspecified")
            .map(|w| w.to_string())
    }

    /// Key used to collapse duplicate creation requests within a window.
    pub fn dedup_key(&self) -> String {
        dedup_key(self.incident_type, &self.namespace(), self.workload().as_deref())
    }
}

pub fn dedup_key(incident_type: IncidentType, namespace: &str, workload: Option<&str>) -> String {
    format!("{}:{}:{}", incident_type, namespace, workload.unwrap_or("-"))
}

/// Row-level view for `GET /incidents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub incident_id: String,
    pub correlation_id: String,
    pub status: IncidentStatus,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub time_to_triage_ms: Option<u64>,
    pub time_to_investigate_ms: Option<u64>,
    pub time_to_recommend_ms: Option<u64>,
}

/// `POST /demo/inject` body.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectRequest {
    pub incident_type: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub workload: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_severity() -> String {
    "high".to_string()
}

/// `GET /demo/workloads` item.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadStatus {
    pub namespace: String,
    pub workload: String,
    pub desired_replicas: i64,
    pub ready_replicas: i64,
    pub available_replicas: i64,
    pub restarts: u32,
    pub status: String,
    pub message: Option<String>,
}

/// Derive (type, summary) from an Alertmanager-style payload.
pub fn summarize_alert(payload: &serde_json::Value) -> (IncidentType, String) {
    let alertname = payload
        .pointer("/labels/alertname")
        .and_then(|v| v.as_str())
        .unwrap_or("alert");
    let summary = payload
        .pointer("/annotations/summary")
        .and_then(|v| v.as_str())
        .or_else(|| payload.pointer("/annotations/description").and_then(|v| v.as_str()))
        .unwrap_or("Alert received")
        .to_string();
    (IncidentType::from_label(alertname), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn unknown_alertname_maps_to_generic_alert() {
        let (kind, summary) = summarize_alert(&json!({
            "labels": {"alertname": "KubePodNotReady"},
            "annotations": {"summary": "pod stuck"}
        }));
        assert_eq!(kind, IncidentType::Alert);
        assert_eq!(summary, "pod stuck");
    }

    #[test]
    fn strict_parse_rejects_unknown_types() {
        assert!(IncidentType::parse_strict("crashloop").is_some());
        assert!(IncidentType::parse_strict("meteor_strike").is_none());
    }

    #[test]
    fn dedup_key_covers_type_namespace_workload() {
        let incident = Incident::new(
            IncidentType::Crashloop,
            Severity::High,
            "demo".into(),
            json!({"labels": {"namespace": "ns-a"}, "annotations": {"workload": "app-a"}}),
            "corr".into(),
        );
        assert_eq!(incident.dedup_key(), "crashloop:ns-a:app-a");
    }

    #[test]
    fn new_incident_seeds_alert_timeline_entry() {
        let incident = Incident::new(
            IncidentType::HighLatency,
            Severity::Medium,
            "demo".into(),
            json!({}),
            "corr".into(),
        );
        assert_eq!(incident.timeline.len(), 1);
        assert_eq!(incident.timeline[0].stage, Stage::Alert);
        assert_eq!(incident.timeline[0].status, StageEventStatus::Completed);
        assert_eq!(incident.namespace(), "default");
        assert!(incident.workload().is_none());
    }

    #[test]
    fn incident_round_trips_through_json() {
        let incident = Incident::new(
            IncidentType::RolloutFailure,
            Severity::Critical,
            "rollout stuck".into(),
            json!({"labels": {"namespace": "ns-b"}}),
            "corr".into(),
        );
        let encoded = serde_json::to_string(&incident).unwrap();
        let decoded: Incident = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.incident_id, incident.incident_id);
        assert_eq!(decoded.incident_type, IncidentType::RolloutFailure);
        assert_eq!(decoded.status, IncidentStatus::Received);
    }
}
