//! Retrying stage executor.
//!
//! Wraps a stage's `process` with input/output validation, a per-attempt
//! timeout, classified-error retry with exponential backoff, and metrics.
//! Blocking and suspending callers share one retry loop; they differ only in
//! the [`Wait`] primitive used between attempts.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::domain::{Payload, StageKind};
use crate::stages::{ErrorClass, Stage, StageError};

use super::pipeline::RetryPolicy;
use super::safety::{SafetyLimits, SafetyViolation};

/// Outcome of one stage execution after retries
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// A validated output
    Output(Payload),

    /// Every attempt failed
    NoResult(NoResult),
}

impl StageResult {
    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult(_))
    }

    pub fn into_output(self) -> Option<Payload> {
        match self {
            Self::Output(payload) => Some(payload),
            Self::NoResult(_) => None,
        }
    }
}

/// Why a stage produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoResult {
    pub stage: StageKind,
    pub attempts: u32,
    pub last_error: Option<ErrorClass>,
}

/// Delay primitive used between attempts
#[async_trait]
pub(crate) trait Wait: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Suspends only the calling task
pub(crate) struct Suspend;

#[async_trait]
impl Wait for Suspend {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Blocks the current thread
pub(crate) struct Block;

#[async_trait]
impl Wait for Block {
    async fn wait(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Map a raw failure to the taxonomy
///
/// This is the only place raw failure detail is inspected.
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<StageError>() {
            return e.class();
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return ErrorClass::Timeout;
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return ErrorClass::Timeout;
            }
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            if e.kind() == io::ErrorKind::TimedOut {
                return ErrorClass::Timeout;
            }
        }
        if cause.downcast_ref::<serde_json::Error>().is_some()
            || cause.downcast_ref::<SafetyViolation>().is_some()
        {
            return ErrorClass::Validation;
        }
    }
    ErrorClass::Generic
}

/// Counters owned by one executor
#[derive(Debug, Default)]
struct StageMetrics {
    task_count: AtomicU64,
    attempts: AtomicU64,
    total_duration_us: AtomicU64,
    timeouts: AtomicU64,
    validation_errors: AtomicU64,
    generic_errors: AtomicU64,
    no_results: AtomicU64,
}

impl StageMetrics {
    fn record_failure(&self, class: ErrorClass) {
        let counter = match class {
            ErrorClass::Timeout => &self.timeouts,
            ErrorClass::Validation => &self.validation_errors,
            ErrorClass::Generic => &self.generic_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, elapsed: Duration) {
        self.task_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            task_count: self.task_count.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_us.load(Ordering::Relaxed) / 1000,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            generic_errors: self.generic_errors.load(Ordering::Relaxed),
            no_results: self.no_results.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of an executor's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetricsSnapshot {
    /// Successful executions
    pub task_count: u64,
    /// Calls made to `process`
    pub attempts: u64,
    /// Time spent in successful executions
    pub total_duration_ms: u64,
    pub timeouts: u64,
    pub validation_errors: u64,
    pub generic_errors: u64,
    /// Executions that exhausted their attempts
    pub no_results: u64,
}

impl StageMetricsSnapshot {
    /// Number of failures that went through classification
    pub fn classified(&self) -> u64 {
        self.timeouts + self.validation_errors + self.generic_errors
    }

    /// Successful executions per second of execution time
    pub fn throughput(&self) -> f64 {
        if self.total_duration_ms == 0 {
            return 0.0;
        }
        self.task_count as f64 / (self.total_duration_ms as f64 / 1000.0)
    }
}

/// Runs one stage with validation, timeout, retry and metrics
pub struct RetryExecutor {
    stage: Arc<dyn Stage>,
    policy: RetryPolicy,
    limits: SafetyLimits,
    timeout: Duration,
    metrics: StageMetrics,
}

impl RetryExecutor {
    /// Executor with the default 30s timeout and default limits
    pub fn new(stage: Arc<dyn Stage>, policy: RetryPolicy) -> Self {
        Self {
            stage,
            policy,
            limits: SafetyLimits::default(),
            timeout: Duration::from_secs(30),
            metrics: StageMetrics::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: SafetyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Configured per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn metrics(&self) -> StageMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Execute, suspending only this task during backoff
    pub async fn execute(&self, input: Payload, timeout: Duration) -> Result<StageResult, StageError> {
        self.execute_with(input, timeout, &Suspend).await
    }

    /// Execute on a private runtime, blocking the calling thread
    ///
    /// Must not be called from inside an async runtime. The thread-blocking
    /// wait behind this form is not reachable from outside the crate:
    ///
    /// ```compile_fail
    /// use docflow::core::retry::Block;
    /// ```
    pub fn execute_blocking(&self, input: Payload, timeout: Duration) -> Result<StageResult, StageError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(StageError::Runtime(
                "execute_blocking called from inside an async runtime".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StageError::Runtime(e.to_string()))?;

        runtime.block_on(self.execute_with(input, timeout, &Block))
    }

    /// The retry loop shared by both execution forms
    ///
    /// Only an invalid input is returned as `Err`; attempt failures end in
    /// `StageResult::NoResult` once the policy is exhausted.
    pub(crate) async fn execute_with(
        &self,
        input: Payload,
        timeout: Duration,
        wait: &dyn Wait,
    ) -> Result<StageResult, StageError> {
        self.validate_input(&input)?;

        let kind = self.kind();
        let max_attempts = self.policy.max_attempts.max(1);
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

            match self.attempt(input.clone(), timeout).await {
                Ok(output) => {
                    let elapsed = started.elapsed();
                    self.metrics.record_success(elapsed);
                    debug!(
                        stage = %kind,
                        attempt,
                        duration_ms = elapsed.as_millis() as u64,
                        "Stage completed"
                    );
                    return Ok(StageResult::Output(output));
                }
                Err(e) => {
                    let class = classify(&e);
                    self.metrics.record_failure(class);
                    last_error = Some(class);

                    if self.policy.should_retry(attempt) {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            stage = %kind,
                            attempt,
                            class = ?class,
                            delay_ms = delay.as_millis() as u64,
                            error = %format!("{:#}", e),
                            "Stage attempt failed, retrying"
                        );
                        wait.wait(delay).await;
                    } else {
                        error!(
                            stage = %kind,
                            attempt,
                            class = ?class,
                            error = %format!("{:#}", e),
                            "Stage failed permanently"
                        );
                    }
                }
            }
        }

        self.metrics.no_results.fetch_add(1, Ordering::Relaxed);
        Ok(StageResult::NoResult(NoResult {
            stage: kind,
            attempts: max_attempts,
            last_error,
        }))
    }

    /// One bounded call to `process` plus output validation
    async fn attempt(&self, input: Payload, timeout: Duration) -> anyhow::Result<Payload> {
        let output = match tokio::time::timeout(timeout, self.stage.process(input)).await {
            Ok(result) => result?,
            Err(_) => return Err(StageError::Timeout(timeout).into()),
        };

        self.stage.validate_output(&output)?;
        self.limits.validate_output(output.content_len() as u64)?;

        Ok(output)
    }

    fn validate_input(&self, input: &Payload) -> Result<(), StageError> {
        self.stage.validate_input(input)?;
        self.limits.validate_input(input.content_len() as u64, None)?;
        Ok(())
    }
}
