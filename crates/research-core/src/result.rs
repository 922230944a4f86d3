//! Per-stage settlement results

use crate::payload::StagePayload;
use crate::stage::{StageName, StageOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a stage settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Full-confidence output
    Success,
    /// Partial or lower-confidence output, still usable
    Degraded,
    /// No usable output
    Failed,
}

/// Where a settled result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Produced by the collaborator during this run
    Fresh,
    /// Served from the process-wide result cache
    Cached,
}

/// One stage's settled outcome within a run
///
/// Invariant: `payload` is present exactly when status is Success or
/// Degraded; `error` is present exactly when status is Failed. Build these
/// through the constructors below, which uphold that pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    pub payload: Option<StagePayload>,
    pub caveats: Vec<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub source: DataSource,
}

impl StageResult {
    pub fn success(stage: StageName, payload: StagePayload) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            payload: Some(payload),
            caveats: Vec::new(),
            error: None,
            completed_at: Utc::now(),
            source: DataSource::Fresh,
        }
    }

    pub fn degraded(stage: StageName, payload: StagePayload, caveats: Vec<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Degraded,
            payload: Some(payload),
            caveats,
            error: None,
            completed_at: Utc::now(),
            source: DataSource::Fresh,
        }
    }

    pub fn failed(stage: StageName, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            payload: None,
            caveats: Vec::new(),
            error: Some(reason.into()),
            completed_at: Utc::now(),
            source: DataSource::Fresh,
        }
    }

    /// Fold a collaborator's output into a result; caveats downgrade to
    /// Degraded.
    pub fn from_output(stage: StageName, output: StageOutput) -> Self {
        if output.caveats.is_empty() {
            Self::success(stage, output.payload)
        } else {
            Self::degraded(stage, output.payload, output.caveats)
        }
    }

    /// Success or Degraded, i.e. carries a payload dependents can consume
    pub fn is_usable(&self) -> bool {
        matches!(self.status, StageStatus::Success | StageStatus::Degraded)
    }

    /// Clone of this result marked as served from cache
    pub fn as_cached(&self) -> Self {
        let mut cached = self.clone();
        cached.source = DataSource::Cached;
        cached
    }
}
