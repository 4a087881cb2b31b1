//! Incident lifecycle state machine.
//!
//! Pure state/transition logic, no I/O. The orchestrator feeds it stage
//! outcomes; it owns the audit timeline and derives stage timings from it.
//! Status only moves forward or to `failed`; stages cannot be skipped and
//! a completed stage cannot be re-entered within a run.

pub mod orchestrator;

use crate::error::PipelineError;
use crate::model::{IncidentStatus, Stage, StageEvent, StageEventStatus, StageTiming};
use chrono::{DateTime, Utc};

/// What the orchestrator reports back to the machine.
#[derive(Debug, Clone, Copy)]
pub enum StageOutcome {
    Entered(Stage),
    Completed(Stage),
    /// Completed despite partial sub-task failures.
    CompletedDegraded(Stage),
}

pub struct IncidentStateMachine {
    status: IncidentStatus,
    timeline: Vec<StageEvent>,
    completed: Vec<Stage>,
}

impl IncidentStateMachine {
    /// Fresh machine for a newly ingested alert. The alert stage is
    /// recorded as already completed at ingestion time.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        IncidentStateMachine {
            status: IncidentStatus::Received,
            timeline: vec![StageEvent {
                stage: Stage::Alert,
                status: StageEventStatus::Completed,
                timestamp: created_at,
            }],
            completed: vec![Stage::Alert],
        }
    }

    /// Rebuild machine state from a persisted timeline.
    pub fn resume(status: IncidentStatus, timeline: Vec<StageEvent>) -> Self {
        let completed = timeline
            .iter()
            .filter(|e| {
                matches!(e.status, StageEventStatus::Completed | StageEventStatus::Degraded)
            })
            .map(|e| e.stage)
            .collect();
        IncidentStateMachine { status, timeline, completed }
    }

    pub fn status(&self) -> IncidentStatus {
        self.status
    }

    pub fn timeline(&self) -> &[StageEvent] {
        &self.timeline
    }

    /// True once a stage has completed (normally or degraded) in this run
    /// or in the persisted timeline a resumed machine was built from.
    pub fn stage_completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// Apply one outcome. Appends exactly one timeline event, except for
    /// the idempotent retry no-op of re-entering the in-flight stage.
    pub fn advance(&mut self, outcome: StageOutcome) -> Result<IncidentStatus, PipelineError> {
        if self.status.is_terminal() {
            return Err(self.invalid(outcome));
        }
        match outcome {
            StageOutcome::Entered(stage) => {
                if stage == Stage::Alert {
                    return Err(self.invalid(outcome));
                }
                if self.status == executing_status(stage) && !self.completed.contains(&stage) {
                    // Retry at the same stage: idempotent no-op.
                    return Ok(self.status);
                }
                if self.completed.contains(&stage) {
                    return Err(self.invalid(outcome));
                }
                let entry_ok = self.status == entry_status(stage)
                    && predecessor(stage).map_or(true, |p| self.completed.contains(&p));
                if !entry_ok {
                    return Err(self.invalid(outcome));
                }
                self.append(stage, StageEventStatus::Started);
                self.status = executing_status(stage);
                Ok(self.status)
            }
            StageOutcome::Completed(stage) | StageOutcome::CompletedDegraded(stage) => {
                if self.status != executing_status(stage) || self.completed.contains(&stage) {
                    return Err(self.invalid(outcome));
                }
                let event_status = match outcome {
                    StageOutcome::CompletedDegraded(_) => StageEventStatus::Degraded,
                    _ => StageEventStatus::Completed,
                };
                self.append(stage, event_status);
                self.completed.push(stage);
                if stage == Stage::Validate {
                    self.status = IncidentStatus::Validated;
                }
                Ok(self.status)
            }
        }
    }

    /// Move to `failed` from any non-terminal state, recording a failed
    /// event for the stage that was executing (or about to execute).
    pub fn fail(&mut self) -> IncidentStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        let stage = self.current_stage();
        self.append(stage, StageEventStatus::Failed);
        self.status = IncidentStatus::Failed;
        self.status
    }

    /// Pair each started event with its first terminal event.
    pub fn stage_timings(&self) -> Vec<StageTiming> {
        timings_from(&self.timeline)
    }

    fn current_stage(&self) -> Stage {
        match self.status {
            IncidentStatus::Received | IncidentStatus::Triaging => Stage::Triage,
            IncidentStatus::Investigating => Stage::Investigate,
            IncidentStatus::Recommending => Stage::Recommend,
            IncidentStatus::Validating | IncidentStatus::Validated | IncidentStatus::Failed => {
                Stage::Validate
            }
        }
    }

    fn append(&mut self, stage: Stage, status: StageEventStatus) {
        // Timeline timestamps are non-decreasing even if the clock steps.
        let now = Utc::now();
        let timestamp = match self.timeline.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.timeline.push(StageEvent { stage, status, timestamp });
    }

    fn invalid(&self, outcome: StageOutcome) -> PipelineError {
        PipelineError::InvalidTransition {
            from: self.status.to_string(),
            event: format!("{:?}", outcome),
        }
    }
}

/// Derive stage timings from a timeline by pairing each started event
/// with its first terminal event for the same stage.
pub fn timings_from(timeline: &[StageEvent]) -> Vec<StageTiming> {
    let mut timings = Vec::new();
    let mut open: Vec<(Stage, DateTime<Utc>)> = Vec::new();
    for event in timeline {
        match event.status {
            StageEventStatus::Started => open.push((event.stage, event.timestamp)),
            _ => {
                if let Some(pos) = open.iter().position(|(s, _)| *s == event.stage) {
                    let (stage, started) = open.remove(pos);
                    let duration_ms = (event.timestamp - started).num_milliseconds().max(0);
                    timings.push(StageTiming { stage, duration_ms: duration_ms as u64 });
                }
            }
        }
    }
    timings
}

/// Status required to enter a stage.
fn entry_status(stage: Stage) -> IncidentStatus {
    match stage {
        Stage::Alert | Stage::Triage => IncidentStatus::Received,
        Stage::Investigate => IncidentStatus::Triaging,
        Stage::Recommend => IncidentStatus::Investigating,
        Stage::Validate => IncidentStatus::Recommending,
    }
}

/// Status while a stage is executing.
fn executing_status(stage: Stage) -> IncidentStatus {
    match stage {
        Stage::Alert => IncidentStatus::Received,
        Stage::Triage => IncidentStatus::Triaging,
        Stage::Investigate => IncidentStatus::Investigating,
        Stage::Recommend => IncidentStatus::Recommending,
        Stage::Validate => IncidentStatus::Validating,
    }
}

fn predecessor(stage: Stage) -> Option<Stage> {
    match stage {
        Stage::Alert => None,
        Stage::Triage => Some(Stage::Alert),
        Stage::Investigate => Some(Stage::Triage),
        Stage::Recommend => Some(Stage::Investigate),
        Stage::Validate => Some(Stage::Recommend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> IncidentStateMachine {
        IncidentStateMachine::new(Utc::now())
    }

    fn run_to(sm: &mut IncidentStateMachine, stages: &[Stage]) {
        for stage in stages {
            sm.advance(StageOutcome::Entered(*stage)).unwrap();
            sm.advance(StageOutcome::Completed(*stage)).unwrap();
        }
    }

    #[test]
    fn full_run_reaches_validated() {
        let mut sm = machine();
        run_to(
            &mut sm,
            &[Stage::Triage, Stage::Investigate, Stage::Recommend, Stage::Validate],
        );
        assert_eq!(sm.status(), IncidentStatus::Validated);
        // alert completed + 4 x (started, completed)
        assert_eq!(sm.timeline().len(), 9);
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let mut sm = machine();
        assert!(sm.advance(StageOutcome::Entered(Stage::Investigate)).is_err());
        sm.advance(StageOutcome::Entered(Stage::Triage)).unwrap();
        // Triage entered but not completed: investigate still rejected.
        assert!(sm.advance(StageOutcome::Entered(Stage::Investigate)).is_err());
    }

    #[test]
    fn reentering_inflight_stage_is_idempotent_noop() {
        let mut sm = machine();
        sm.advance(StageOutcome::Entered(Stage::Triage)).unwrap();
        let before = sm.timeline().len();
        let status = sm.advance(StageOutcome::Entered(Stage::Triage)).unwrap();
        assert_eq!(status, IncidentStatus::Triaging);
        assert_eq!(sm.timeline().len(), before);
    }

    #[test]
    fn reentering_completed_stage_is_rejected() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage]);
        sm.advance(StageOutcome::Entered(Stage::Investigate)).unwrap();
        assert!(sm.advance(StageOutcome::Entered(Stage::Triage)).is_err());
    }

    #[test]
    fn failure_is_reachable_from_any_nonterminal_state() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage]);
        sm.advance(StageOutcome::Entered(Stage::Investigate)).unwrap();
        assert_eq!(sm.fail(), IncidentStatus::Failed);
        let last = sm.timeline().last().unwrap();
        assert_eq!(last.stage, Stage::Investigate);
        assert_eq!(last.status, StageEventStatus::Failed);
        // Terminal: nothing moves anymore.
        assert!(sm.advance(StageOutcome::Entered(Stage::Recommend)).is_err());
        assert_eq!(sm.fail(), IncidentStatus::Failed);
    }

    #[test]
    fn degraded_completion_counts_as_completion() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage]);
        sm.advance(StageOutcome::Entered(Stage::Investigate)).unwrap();
        sm.advance(StageOutcome::CompletedDegraded(Stage::Investigate)).unwrap();
        sm.advance(StageOutcome::Entered(Stage::Recommend)).unwrap();
        assert_eq!(sm.status(), IncidentStatus::Recommending);
    }

    #[test]
    fn timestamps_are_nondecreasing() {
        let mut sm = machine();
        run_to(
            &mut sm,
            &[Stage::Triage, Stage::Investigate, Stage::Recommend, Stage::Validate],
        );
        let timeline = sm.timeline();
        for pair in timeline.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn timings_pair_started_with_terminal_events() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage, Stage::Investigate]);
        let timings = sm.stage_timings();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].stage, Stage::Triage);
        assert_eq!(timings[1].stage, Stage::Investigate);
    }

    #[test]
    fn validated_only_reachable_through_validate_stage() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage, Stage::Investigate, Stage::Recommend]);
        assert_eq!(sm.status(), IncidentStatus::Recommending);
        sm.advance(StageOutcome::Entered(Stage::Validate)).unwrap();
        assert_eq!(sm.status(), IncidentStatus::Validating);
        sm.advance(StageOutcome::Completed(Stage::Validate)).unwrap();
        assert_eq!(sm.status(), IncidentStatus::Validated);
    }

    #[test]
    fn resume_restores_completed_set() {
        let mut sm = machine();
        run_to(&mut sm, &[Stage::Triage]);
        let timeline = sm.timeline().to_vec();
        let mut resumed = IncidentStateMachine::resume(sm.status(), timeline);
        assert!(resumed.advance(StageOutcome::Entered(Stage::Triage)).is_err());
        resumed.advance(StageOutcome::Entered(Stage::Investigate)).unwrap();
    }
}
