//! Pipeline jobs and their lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::DEFAULT_PRIORITY;
use super::payload::Payload;

/// A document waiting to be run through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Identifier used for log correlation
    pub id: Uuid,

    /// Path-like reference to the source document
    pub reference: String,

    /// Lower value = more urgent
    pub priority: i64,

    /// Optional notification address
    pub recipient: Option<String>,
}

impl PipelineJob {
    /// Create a job with the default priority
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            priority: DEFAULT_PRIORITY,
            recipient: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the recipient
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// The payload fed to the first stage
    pub fn initial_payload(&self) -> Payload {
        Payload::Reference {
            path: self.reference.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

/// Lifecycle of a job
///
/// `Queued -> Running -> {Completed, Failed, Skipped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the job queue
    Queued,

    /// Owned by a worker
    Running,

    /// Every stage produced a valid result
    Completed,

    /// An unexpected failure escaped a stage
    Failed,

    /// A stage returned no result; later stages were not run
    Skipped,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Queued
    }
}

impl JobState {
    /// Whether the job has reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Legal edges of the lifecycle
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_builder() {
        let job = PipelineJob::new("docs/a.txt")
            .with_priority(1)
            .with_recipient("team@example.com");

        assert_eq!(job.priority, 1);
        match job.initial_payload() {
            Payload::Reference { path, recipient } => {
                assert_eq!(path, "docs/a.txt");
                assert_eq!(recipient.as_deref(), Some("team@example.com"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Skipped));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
