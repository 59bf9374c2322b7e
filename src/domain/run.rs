//! The record of one job's trip through the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobState, PipelineJob};
use super::payload::Payload;

/// The three stage variants, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Document reference -> text
    Ingestion,

    /// Text -> summary
    Transformation,

    /// Summary -> message
    Notification,
}

impl StageKind {
    /// Pipeline order
    pub const ORDER: [StageKind; 3] = [Self::Ingestion, Self::Transformation, Self::Notification];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Transformation => "transformation",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one job through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Job identifier
    pub job_id: Uuid,

    /// Document reference the job was created for
    pub reference: String,

    /// Priority the job was queued with
    pub priority: i64,

    /// Current state
    pub state: JobState,

    /// When the job left the queue
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock time spent running
    pub duration_ms: Option<u64>,

    /// Output of each stage that produced one
    pub outputs: BTreeMap<StageKind, Payload>,

    /// Stage that returned no result, for skipped runs
    pub skipped_at: Option<StageKind>,

    /// Failure detail, for failed runs
    pub error: Option<String>,
}

impl PipelineRun {
    /// A queued run for a job
    pub fn new(job: &PipelineJob) -> Self {
        Self {
            job_id: job.id,
            reference: job.reference.clone(),
            priority: job.priority,
            state: JobState::Queued,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            outputs: BTreeMap::new(),
            skipped_at: None,
            error: None,
        }
    }

    /// Move to `next`, ignoring illegal transitions
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        match next {
            JobState::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Record a stage output
    pub fn record_output(&mut self, stage: StageKind, output: Payload) {
        self.outputs.insert(stage, output);
    }

    /// Final output of the pipeline, when completed
    pub fn notification(&self) -> Option<&Payload> {
        self.outputs.get(&StageKind::Notification)
    }

    /// Mark the run skipped at `stage`
    pub fn skip_at(&mut self, stage: StageKind) {
        if self.transition(JobState::Skipped) {
            self.skipped_at = Some(stage);
        }
    }

    /// Mark the run failed with an error message
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.state == JobState::Queued {
            self.transition(JobState::Running);
        }
        if self.transition(JobState::Failed) {
            self.error = Some(error.into());
        }
    }
}
