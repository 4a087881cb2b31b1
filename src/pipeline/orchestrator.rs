//! Per-incident pipeline driver.
//!
//! Each run executes as one spawned task holding the incident's lease.
//! Stage sequencing, timeouts, degraded markers and cancellation all live
//! here; the state machine owns legality and the timeline, the store owns
//! durability.

use crate::error::PipelineError;
use crate::investigate::Aggregator;
use crate::model::{
    summarize_alert, Evidence, Incident, IncidentStatus, IncidentType, InjectRequest,
    RecommendedAction, Risk, Severity, SourceKind, Stage, StageEvent, StageEventStatus,
};
use crate::notify::Notifier;
use crate::pipeline::{IncidentStateMachine, StageOutcome};
use crate::recommend::RecommendationEngine;
use crate::store::lease::LeaseToken;
use crate::store::IncidentStore;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub investigate_timeout: Duration,
    pub lease_ttl: Duration,
    pub lease_renew_every: Duration,
    pub dedup_window: Duration,
}

impl RunSettings {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        RunSettings {
            investigate_timeout: cfg.timeouts.investigate(),
            lease_ttl: cfg.lease.ttl(),
            lease_renew_every: cfg.lease.renew_every(),
            dedup_window: Duration::from_secs(cfg.dedup_window_secs),
        }
    }
}

/// Result of alert ingestion. `created` is false when the alert collapsed
/// onto an existing incident inside the dedup window.
#[derive(Debug)]
pub struct Ingested {
    pub incident: Incident,
    pub created: bool,
}

pub struct Orchestrator {
    store: IncidentStore,
    aggregator: Arc<Aggregator>,
    engine: Arc<RecommendationEngine>,
    notifier: Notifier,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        store: IncidentStore,
        aggregator: Arc<Aggregator>,
        engine: Arc<RecommendationEngine>,
        notifier: Notifier,
        settings: RunSettings,
    ) -> Self {
        Orchestrator { store, aggregator, engine, notifier, settings }
    }

    /// Ingest an Alertmanager-style payload. Duplicate requests within the
    /// dedup window collapse to the in-flight incident.
    pub fn handle_alert(
        &self,
        payload: Value,
        correlation_id: String,
    ) -> Result<Ingested, PipelineError> {
        let (incident_type, summary) = summarize_alert(&payload);
        let severity = payload
            .pointer("/labels/severity")
            .and_then(|v| v.as_str())
            .map(Severity::from_label)
            .unwrap_or(Severity::Medium);

        let incident =
            Incident::new(incident_type, severity, summary, payload, correlation_id);

        // Lookup and insert are one atomic store operation; two concurrent
        // ingests of the same dedup key resolve to a single incident.
        let (incident, created) = self
            .store
            .create_or_collapse(&incident, self.settings.dedup_window)?;
        if created {
            info!(
                incident_id = %incident.incident_id,
                incident_type = %incident.incident_type,
                severity = %incident.severity,
                "incident created"
            );
        } else {
            info!(
                incident_id = %incident.incident_id,
                dedup_key = %incident.dedup_key(),
                "duplicate alert collapsed to in-flight incident"
            );
        }
        Ok(Ingested { incident, created })
    }

    /// Demo inject: strict on incident_type, then the normal alert path.
    pub fn handle_inject(
        &self,
        req: &InjectRequest,
        correlation_id: String,
    ) -> Result<Ingested, PipelineError> {
        let incident_type = IncidentType::parse_strict(&req.incident_type).ok_or_else(|| {
            PipelineError::InvalidRequest(format!("unknown incident_type {}", req.incident_type))
        })?;
        let payload = json!({
            "labels": {
                "alertname": incident_type.to_string(),
                "severity": req.severity,
                "namespace": req.namespace,
            },
            "annotations": {
                "summary": format!("Demo incident injected: {}", incident_type),
                "workload": req.workload.as_deref().unwrap_or("unspecified"),
            },
        });
        self.handle_alert(payload, correlation_id)
    }

    /// Spawn the pipeline as an independent task.
    pub fn spawn_run(self: &Arc<Self>, incident_id: String) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.run_pipeline(&incident_id).await {
                Ok(status) => {
                    info!(incident_id = %incident_id, status = %status, "pipeline finished")
                }
                Err(PipelineError::LockBusy(_)) => {
                    warn!(incident_id = %incident_id, "pipeline already running, not started")
                }
                Err(err) => {
                    error!(incident_id = %incident_id, error = %err, "pipeline failed")
                }
            }
        });
    }

    /// Run the staged pipeline for one incident under its lease.
    pub async fn run_pipeline(&self, incident_id: &str) -> Result<IncidentStatus, PipelineError> {
        let token = self.store.leases().acquire(incident_id, self.settings.lease_ttl)?;

        // Keep the lease alive for the duration of the run; if the process
        // dies the TTL expires and another process may take over.
        let leases = self.store.leases().clone();
        let renew_token = token.clone();
        let ttl = self.settings.lease_ttl;
        let every = self.settings.lease_renew_every;
        let renewal = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !leases.renew(&renew_token, ttl) {
                    warn!(incident_id = %renew_token.incident_id, "lease renewal lost ownership");
                    break;
                }
            }
        });

        let result = self.drive(incident_id, &token).await;

        renewal.abort();
        self.store.leases().release(&token);
        self.store.clear_cancel(incident_id);
        result
    }

    async fn drive(
        &self,
        incident_id: &str,
        token: &LeaseToken,
    ) -> Result<IncidentStatus, PipelineError> {
        let mut incident = self
            .store
            .get_incident(incident_id)?
            .ok_or_else(|| PipelineError::NotFound(incident_id.to_string()))?;
        if incident.status.is_terminal() {
            return Err(PipelineError::InvalidRequest(format!(
                "incident {} already finished with status {}",
                incident_id, incident.status
            )));
        }
        let mut sm = IncidentStateMachine::resume(incident.status, incident.timeline.clone());

        // A non-fresh status under a newly acquired lease means the prior
        // holder died or lost its lease; pick up from the first incomplete
        // stage and say so in the record.
        if incident.status != IncidentStatus::Received {
            info!(
                incident_id = %incident.incident_id,
                status = %incident.status,
                "taking over an abandoned run"
            );
            incident.evidence.push(Evidence::info(
                SourceKind::Pipeline,
                format!("Run resumed from status {} after lease takeover", incident.status),
            ));
        }

        match self.run_stages(&mut incident, &mut sm, token).await {
            Ok(status) => Ok(status),
            Err(err) => {
                // Without the lease this run no longer owns the record;
                // another holder may already be writing to it.
                if matches!(err, PipelineError::LeaseLost(_)) {
                    warn!(
                        incident_id = %incident.incident_id,
                        "lease lost; abandoning run without writing"
                    );
                    return Err(err);
                }
                warn!(incident_id = %incident.incident_id, error = %err, "pipeline stopping");
                let marker = match &err {
                    PipelineError::Cancelled => Evidence::warning(
                        SourceKind::Pipeline,
                        "Run cancelled by resolve request",
                    ),
                    other => Evidence::error(
                        SourceKind::Pipeline,
                        format!("Pipeline stopped: {}", other),
                    ),
                };
                incident.evidence.push(marker);
                sm.fail();
                if let Err(save_err) = self.sync_and_save(&mut incident, &sm, token) {
                    error!(
                        incident_id = %incident.incident_id,
                        error = %save_err,
                        "failed to persist failed incident"
                    );
                }
                self.notifier.run_finished(&incident).await;
                Err(err)
            }
        }
    }

    /// Already-completed stages are skipped, so a resumed machine picks up
    /// where the persisted timeline left off; re-entering the in-flight
    /// stage is an idempotent no-op on the machine.
    async fn run_stages(
        &self,
        incident: &mut Incident,
        sm: &mut IncidentStateMachine,
        token: &LeaseToken,
    ) -> Result<IncidentStatus, PipelineError> {
        // Triage: classify and record what we already know from the alert.
        if !sm.stage_completed(Stage::Triage) {
            self.checkpoint(incident, token)?;
            sm.advance(StageOutcome::Entered(Stage::Triage))?;
            self.sync_and_save(incident, sm, token)?;
            incident.evidence.push(Evidence::info(
                SourceKind::Triage,
                format!("Incident severity: {}", incident.severity),
            ));
            incident.evidence.push(Evidence::info(
                SourceKind::Triage,
                format!("Incident type: {}", incident.incident_type),
            ));
            sm.advance(StageOutcome::Completed(Stage::Triage))?;
            self.sync_and_save(incident, sm, token)?;
            self.notifier.incident_created(incident).await;
        }

        // Investigate: concurrent fan-out, bounded by the outer stage
        // timeout regardless of per-source timeouts.
        if !sm.stage_completed(Stage::Investigate) {
            self.checkpoint(incident, token)?;
            sm.advance(StageOutcome::Entered(Stage::Investigate))?;
            self.sync_and_save(incident, sm, token)?;
            let namespace = incident.namespace();
            let workload = incident.workload();
            let investigate_outcome = match tokio::time::timeout(
                self.settings.investigate_timeout,
                self.aggregator.collect_all(&namespace, workload.as_deref()),
            )
            .await
            {
                Ok(merged) => {
                    incident.evidence.extend(merged.evidence);
                    incident.links.extend(merged.links);
                    for (kind, message) in &merged.failed_sources {
                        incident.evidence.push(Evidence::error(
                            SourceKind::Pipeline,
                            format!("Evidence source {} degraded: {}", kind, message),
                        ));
                    }
                    if merged.degraded {
                        incident.degraded = true;
                        StageOutcome::CompletedDegraded(Stage::Investigate)
                    } else {
                        StageOutcome::Completed(Stage::Investigate)
                    }
                }
                Err(_) => {
                    incident.degraded = true;
                    incident.evidence.push(Evidence::error(
                        SourceKind::Pipeline,
                        format!(
                            "Investigate stage timed out after {}ms; evidence is partial",
                            self.settings.investigate_timeout.as_millis()
                        ),
                    ));
                    StageOutcome::CompletedDegraded(Stage::Investigate)
                }
            };
            sm.advance(investigate_outcome)?;
            self.sync_and_save(incident, sm, token)?;
        }

        // Recommend: single provider call; the engine falls back to the
        // deterministic mock on its own.
        if !sm.stage_completed(Stage::Recommend) {
            self.checkpoint(incident, token)?;
            sm.advance(StageOutcome::Entered(Stage::Recommend))?;
            self.sync_and_save(incident, sm, token)?;
            let output = self
                .engine
                .recommend(&incident.evidence, incident.incident_type)
                .await;
            incident.root_cause_hypotheses = output.recommendation.hypotheses;
            incident.recommended_actions = output.recommendation.actions;
            incident.evidence.push(Evidence::info(
                SourceKind::Pipeline,
                format!("Recommendations produced by provider {}", output.provider),
            ));
            let recommend_outcome = if output.degraded {
                incident.degraded = true;
                incident.evidence.push(Evidence::warning(
                    SourceKind::Pipeline,
                    "Configured recommendation provider failed; deterministic mock fallback used",
                ));
                StageOutcome::CompletedDegraded(Stage::Recommend)
            } else {
                StageOutcome::Completed(Stage::Recommend)
            };
            sm.advance(recommend_outcome)?;
            self.sync_and_save(incident, sm, token)?;
            self.notifier.recommendation_ready(incident).await;
        }

        // Validate: consistency checks over the finished record.
        self.checkpoint(incident, token)?;
        sm.advance(StageOutcome::Entered(Stage::Validate))?;
        self.sync_and_save(incident, sm, token)?;
        self.validate_record(incident, sm);
        sm.advance(StageOutcome::Completed(Stage::Validate))?;
        self.sync_and_save(incident, sm, token)?;
        self.notifier.run_finished(incident).await;

        Ok(sm.status())
    }

    /// Final consistency pass: every completed stage must carry a timing,
    /// evidence is non-empty or explicitly marked, actions never end empty.
    fn validate_record(&self, incident: &mut Incident, sm: &IncidentStateMachine) {
        let timings = sm.stage_timings();
        for stage in [Stage::Triage, Stage::Investigate, Stage::Recommend] {
            if !timings.iter().any(|t| t.stage == stage) {
                incident.evidence.push(Evidence::warning(
                    SourceKind::Pipeline,
                    format!("Consistency check: stage {} has no recorded timing", stage),
                ));
            }
        }

        let has_cluster_evidence = incident.evidence.iter().any(|e| {
            matches!(
                e.source,
                SourceKind::KubernetesPods
                    | SourceKind::KubernetesDeployments
                    | SourceKind::KubernetesEvents
                    | SourceKind::Logs
            )
        });
        if !has_cluster_evidence {
            incident.evidence.push(Evidence::info(
                SourceKind::Pipeline,
                "No cluster evidence collected; record marked empty-evidence",
            ));
        }

        if incident.recommended_actions.is_empty() {
            incident.recommended_actions.push(RecommendedAction {
                action: "Run kubectl get events to confirm status".into(),
                risk: Risk::Low,
                confidence: 0.4,
            });
        }
    }

    /// Between-stage checkpoint, never mid network call: the run stops if
    /// its lease is no longer live or a cancel was requested.
    fn checkpoint(&self, incident: &Incident, token: &LeaseToken) -> Result<(), PipelineError> {
        if !self.store.leases().is_held(token) {
            return Err(PipelineError::LeaseLost(incident.incident_id.clone()));
        }
        if self.store.cancel_requested(&incident.incident_id) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Persist the machine's view. Writing requires a live lease; a run
    /// that lost its lease mid-stage stops at the next write.
    fn sync_and_save(
        &self,
        incident: &mut Incident,
        sm: &IncidentStateMachine,
        token: &LeaseToken,
    ) -> Result<(), PipelineError> {
        if !self.store.leases().is_held(token) {
            return Err(PipelineError::LeaseLost(incident.incident_id.clone()));
        }
        incident.status = sm.status();
        incident.timeline = sm.timeline().to_vec();
        incident.stage_timings = sm.stage_timings();
        incident.updated_at = Utc::now();
        self.store.save_incident(incident)?;
        Ok(())
    }

    /// Request cancellation of a running pipeline.
    pub fn resolve(&self, incident_id: &str) -> Result<(), PipelineError> {
        let incident = self
            .store
            .get_incident(incident_id)?
            .ok_or_else(|| PipelineError::NotFound(incident_id.to_string()))?;
        self.store.request_cancel(&incident.incident_id);
        info!(incident_id = %incident_id, "cancellation requested");
        Ok(())
    }

    /// Re-validation: a new bounded run over a finished record. The record
    /// only gains data -- fresh evidence, hypotheses, actions and timeline
    /// annotations are appended, nothing is removed.
    pub async fn revalidate(&self, incident_id: &str) -> Result<Incident, PipelineError> {
        let mut incident = self
            .store
            .get_incident(incident_id)?
            .ok_or_else(|| PipelineError::NotFound(incident_id.to_string()))?;
        if !incident.status.is_terminal() {
            return Err(PipelineError::InvalidRequest(format!(
                "incident {} still has a run in progress",
                incident_id
            )));
        }
        let token = self.store.leases().acquire(incident_id, self.settings.lease_ttl)?;
        let result = self.revalidate_locked(&mut incident, &token).await;
        self.store.leases().release(&token);
        result?;
        Ok(incident)
    }

    async fn revalidate_locked(
        &self,
        incident: &mut Incident,
        token: &LeaseToken,
    ) -> Result<(), PipelineError> {
        incident.evidence.push(Evidence::info(
            SourceKind::Pipeline,
            format!("Re-validation run started at {}", Utc::now().to_rfc3339()),
        ));

        push_event(incident, Stage::Investigate, StageEventStatus::Started);
        let namespace = incident.namespace();
        let workload = incident.workload();
        let (fresh_evidence, investigate_degraded) = match tokio::time::timeout(
            self.settings.investigate_timeout,
            self.aggregator.collect_all(&namespace, workload.as_deref()),
        )
        .await
        {
            Ok(merged) => (merged.evidence, merged.degraded),
            Err(_) => (Vec::new(), true),
        };
        if investigate_degraded {
            incident.degraded = true;
        }
        incident.evidence.extend(fresh_evidence);
        push_event(
            incident,
            Stage::Investigate,
            if investigate_degraded {
                StageEventStatus::Degraded
            } else {
                StageEventStatus::Completed
            },
        );

        push_event(incident, Stage::Recommend, StageEventStatus::Started);
        let output = self
            .engine
            .recommend(&incident.evidence, incident.incident_type)
            .await;
        for hypothesis in output.recommendation.hypotheses {
            if !incident
                .root_cause_hypotheses
                .iter()
                .any(|h| h.hypothesis == hypothesis.hypothesis)
            {
                incident.root_cause_hypotheses.push(hypothesis);
            }
        }
        for action in output.recommendation.actions {
            if !incident.recommended_actions.iter().any(|a| a.action == action.action) {
                incident.recommended_actions.push(action);
            }
        }
        push_event(
            incident,
            Stage::Recommend,
            if output.degraded { StageEventStatus::Degraded } else { StageEventStatus::Completed },
        );

        push_event(incident, Stage::Validate, StageEventStatus::Started);
        push_event(incident, Stage::Validate, StageEventStatus::Completed);

        if !self.store.leases().is_held(token) {
            return Err(PipelineError::LeaseLost(incident.incident_id.clone()));
        }
        incident.stage_timings = crate::pipeline::timings_from(&incident.timeline);
        incident.updated_at = Utc::now();
        self.store.save_incident(incident)?;
        Ok(())
    }
}

fn push_event(incident: &mut Incident, stage: Stage, status: StageEventStatus) {
    let now = Utc::now();
    let timestamp = match incident.timeline.last() {
        Some(last) if last.timestamp > now => last.timestamp,
        _ => now,
    };
    incident.timeline.push(StageEvent { stage, status, timestamp });
}
