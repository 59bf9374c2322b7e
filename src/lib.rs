//! docflow - Durable priority event queue and document pipeline runner
//!
//! Jobs flow through three stages (ingest, summarize, notify), each wrapped
//! in a retrying executor with classified errors and backoff. A bounded
//! worker pool drains a priority queue of jobs.
//!
//! # Architecture
//!
//! - Events are appended to a JSONL log before they are enqueued, and the
//!   log is replayed on startup to rebuild the queue
//! - Failed events go to a dead-letter list and are never retried silently
//! - A stage that exhausts its retries yields no result, which skips the
//!   remaining stages of that job only
//!
//! # Modules
//!
//! - `adapters`: Completion service clients (HTTP, extractive)
//! - `cache`: Bounded memoization for stage calls
//! - `core`: EventQueue, RetryExecutor, TaskManager, pipeline definitions
//! - `domain`: Data structures (Event, Payload, PipelineJob, PipelineRun)
//! - `stages`: The Stage contract, built-in stages and the registry
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run one document
//! docflow run report.md --recipient team@example.com
//!
//! # Run many through the worker pool
//! docflow batch docs/*.md --workers 4
//!
//! # Publish and replay events
//! docflow publish --data '{"doc": "a.md"}' --priority 1
//! docflow replay
//! ```

pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use core::{EventQueue, RetryExecutor, StageResult, TaskManager};
pub use domain::{Event, JobState, Payload, PipelineJob, PipelineRun, StageKind};
pub use stages::{ErrorClass, Stage, StageError};
