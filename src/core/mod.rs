//! Core orchestration logic.
//!
//! This module contains:
//! - EventQueue: Durable priority queue with dead-letters
//! - Pipeline: Pipeline definitions and retry policies
//! - Safety: Input/output limits and denylist
//! - Retry: The retrying stage executor
//! - TaskManager: Pipeline execution and the worker pool

pub mod event_queue;
pub mod job_queue;
pub mod pipeline;
pub mod retry;
pub mod safety;
pub mod task_manager;

// Re-export commonly used types
pub use event_queue::{EventHandler, EventQueue, EventQueueConfig, LoggingHandler, QueueError, QueueMetrics};
pub use job_queue::JobQueue;
pub use pipeline::{PipelineSpec, RetryPolicy, StageSpec};
pub use retry::{classify, NoResult, RetryExecutor, StageMetricsSnapshot, StageResult};
pub use safety::{SafetyLimits, SafetyViolation};
pub use task_manager::{PoolReport, TaskManager};
