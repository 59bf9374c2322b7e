//! Domain types for docflow.
//!
//! This module contains the core data structures:
//! - Events: Immutable units of work held by the event queue
//! - Jobs: Pipeline work items and their lifecycle
//! - Payloads: Data flowing between stages
//! - Runs: The outcome of one job's pipeline execution

pub mod events;
pub mod job;
pub mod payload;
pub mod run;

// Re-export commonly used types
pub use events::{now_seconds, Event, DEFAULT_PRIORITY};
pub use job::{JobState, PipelineJob};
pub use payload::{Metadata, Payload};
pub use run::{PipelineRun, StageKind};
