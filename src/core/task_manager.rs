//! Pipeline orchestration.
//!
//! The TaskManager is responsible for:
//! - Running a job through ingestion, transformation and notification in order
//! - Short-circuiting when a stage produces no result
//! - Draining a priority queue of jobs with a bounded worker pool

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{JobState, PipelineJob, PipelineRun, StageKind};
use crate::stages::{Stage, StageRegistry, StageSettings};

use super::job_queue::JobQueue;
use super::pipeline::PipelineSpec;
use super::retry::{RetryExecutor, StageResult};

/// Summary of one worker-pool drain
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    /// One run per job, in completion order
    pub runs: Vec<PipelineRun>,
    pub workers: usize,
    pub duration_ms: u64,
    /// Jobs pushed but not marked done when the pool returned
    pub unfinished: usize,
}

impl PoolReport {
    pub fn count(&self, state: JobState) -> usize {
        self.runs.iter().filter(|r| r.state == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(JobState::Completed)
    }

    pub fn skipped(&self) -> usize {
        self.count(JobState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(JobState::Failed)
    }
}

/// Runs jobs through the stage executors
pub struct TaskManager {
    executors: Vec<RetryExecutor>,
    workers: usize,
}

impl TaskManager {
    /// Build from executors listed in pipeline order
    pub fn new(executors: Vec<RetryExecutor>) -> Result<Self> {
        let kinds: Vec<StageKind> = executors.iter().map(|e| e.kind()).collect();
        if kinds != StageKind::ORDER {
            anyhow::bail!(
                "Executors must cover ingestion, transformation, notification in order (got {:?})",
                kinds
            );
        }

        Ok(Self {
            executors,
            workers: crate::config::DEFAULT_WORKERS,
        })
    }

    /// Build every stage through the registry, wrapped per the pipeline definition
    pub fn from_spec(spec: &PipelineSpec, registry: &StageRegistry, settings: &StageSettings) -> Result<Self> {
        spec.validate()?;

        let stages: Vec<Arc<dyn Stage>> = registry
            .resolve_all(settings)
            .context("Failed to resolve pipeline stages")?;

        let executors = stages
            .into_iter()
            .map(|stage| -> Result<RetryExecutor> {
                let kind = stage.kind();
                let stage_spec = spec
                    .stage(kind)
                    .with_context(|| format!("Pipeline '{}' has no '{}' stage", spec.name, kind))?;
                Ok(RetryExecutor::new(stage, stage_spec.retry_policy.clone())
                    .with_timeout(stage_spec.timeout(spec.default_timeout_seconds))
                    .with_limits(spec.safety_limits.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(executors)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn executor(&self, kind: StageKind) -> Option<&RetryExecutor> {
        self.executors.iter().find(|e| e.kind() == kind)
    }

    pub fn executors(&self) -> &[RetryExecutor] {
        &self.executors
    }

    /// Run one job through every stage
    ///
    /// A stage that produces no result skips the rest of the pipeline. An
    /// input the executor rejects fails the run.
    #[instrument(skip(self, job), fields(job_id = %job.id, reference = %job.reference))]
    pub async fn execute_pipeline(&self, job: &PipelineJob) -> PipelineRun {
        let started = Instant::now();
        let mut run = PipelineRun::new(job);
        run.transition(JobState::Running);

        let mut payload = job.initial_payload();

        for executor in &self.executors {
            let kind = executor.kind();
            match executor.execute(payload.clone(), executor.timeout()).await {
                Ok(StageResult::Output(output)) => {
                    debug!(stage = %kind, shape = output.shape(), "Stage produced output");
                    run.record_output(kind, output.clone());
                    payload = output;
                }
                Ok(StageResult::NoResult(no_result)) => {
                    warn!(
                        stage = %kind,
                        attempts = no_result.attempts,
                        last_error = ?no_result.last_error,
                        "Stage produced no result, skipping remaining stages"
                    );
                    run.skip_at(kind);
                    break;
                }
                Err(e) => {
                    error!(stage = %kind, error = %e, "Stage rejected its input");
                    run.fail(format!("{} stage: {}", kind, e));
                    break;
                }
            }
        }

        if run.state == JobState::Running {
            run.transition(JobState::Completed);
        }
        run.duration_ms = Some(started.elapsed().as_millis() as u64);

        info!(state = ?run.state, duration_ms = run.duration_ms, "Pipeline finished");
        run
    }

    /// Drain `jobs` with the configured number of workers
    pub async fn run_pipeline_queue(self: &Arc<Self>, jobs: Vec<(i64, PipelineJob)>) -> PoolReport {
        self.run_pipeline_queue_with(jobs, self.workers).await
    }

    /// Drain `jobs` with `workers` concurrent workers
    ///
    /// Every job yields exactly one run. A panic inside a pipeline fails that
    /// job only.
    #[instrument(skip(self, jobs), fields(jobs = jobs.len()))]
    pub async fn run_pipeline_queue_with(self: &Arc<Self>, jobs: Vec<(i64, PipelineJob)>, workers: usize) -> PoolReport {
        let started = Instant::now();
        let workers = workers.max(1);

        let queue = Arc::new(JobQueue::new());
        for (priority, job) in jobs {
            queue.push(priority, job);
        }
        info!(workers, queued = queue.len(), "Starting worker pool");

        let (tx, mut rx) = mpsc::unbounded_channel::<PipelineRun>();
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            let queue = queue.clone();
            let manager = self.clone();
            let tx = tx.clone();

            pool.spawn(async move {
                while let Some(job) = queue.pop() {
                    let run = manager.run_isolated(job).await;
                    debug!(worker_id, job_id = %run.job_id, state = ?run.state, "Job done");
                    // The receiver outlives every worker
                    let _ = tx.send(run);
                    queue.task_done();
                }
            });
        }
        drop(tx);

        queue.join().await;

        pool.abort_all();
        while pool.join_next().await.is_some() {}

        let mut runs = Vec::new();
        while let Some(run) = rx.recv().await {
            runs.push(run);
        }

        let report = PoolReport {
            runs,
            workers,
            duration_ms: started.elapsed().as_millis() as u64,
            unfinished: queue.unfinished(),
        };
        info!(
            completed = report.completed(),
            skipped = report.skipped(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Worker pool drained"
        );
        report
    }

    /// Run one pipeline in its own task so a panic stays contained
    async fn run_isolated(self: &Arc<Self>, job: PipelineJob) -> PipelineRun {
        let manager = self.clone();
        let task_job = job.clone();

        match tokio::spawn(async move { manager.execute_pipeline(&task_job).await }).await {
            Ok(run) => run,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Pipeline task aborted");
                let mut run = PipelineRun::new(&job);
                run.fail(format!("pipeline task aborted: {}", e));
                run
            }
        }
    }
}
