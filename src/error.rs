//! Pipeline error taxonomy.
//!
//! Evidence-source and provider failures are absorbed where they happen and
//! degrade the affected stage; only the errors below can stop a run or
//! reject a request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("an investigation is already running for incident {0}")]
    LockBusy(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("incident not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("lease for incident {0} lost; run abandoned")]
    LeaseLost(String),

    #[error("run cancelled")]
    Cancelled,
}
