//! Command-line interface for docflow.
//!
//! Provides commands for running document pipelines (singly or through the
//! worker pool) and for publishing to and replaying the durable event queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::Completer;
use crate::config::{self, ResolvedConfig};
use crate::core::{EventQueue, PipelineSpec, SafetyLimits, TaskManager};
use crate::domain::{Event, JobState, PipelineJob, DEFAULT_PRIORITY};
use crate::stages::{StageRegistry, StageSettings};

/// docflow - Durable priority queue and document pipeline runner
#[derive(Parser, Debug)]
#[command(name = "docflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one document through the pipeline
    Run {
        /// Document to process
        path: PathBuf,

        /// Address for the drafted notification
        #[arg(short, long)]
        recipient: Option<String>,

        /// Pipeline definition (defaults to the configured one)
        #[arg(short, long)]
        pipeline: Option<PathBuf>,
    },

    /// Run many documents through the worker pool
    Batch {
        /// Documents to process
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of concurrent workers
        #[arg(short, long, env = "DOCFLOW_WORKERS")]
        workers: Option<usize>,

        /// Priority for every job (lower runs first)
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: i64,

        /// Address for the drafted notifications
        #[arg(short, long)]
        recipient: Option<String>,

        /// Pipeline definition (defaults to the configured one)
        #[arg(long)]
        pipeline: Option<PathBuf>,
    },

    /// Publish an event to the durable queue
    Publish {
        /// Event ID (generated if not provided)
        #[arg(long)]
        id: Option<String>,

        /// Event payload as JSON
        #[arg(long)]
        data: String,

        /// Priority (lower is more urgent)
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: i64,
    },

    /// Drain the queue in priority order
    Replay,

    /// Show queue length and metrics after recovery
    Status,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                path,
                recipient,
                pipeline,
            } => run_document(path, recipient, pipeline).await,
            Commands::Batch {
                paths,
                workers,
                priority,
                recipient,
                pipeline,
            } => run_batch(paths, workers, priority, recipient, pipeline).await,
            Commands::Publish { id, data, priority } => publish_event(id, &data, priority).await,
            Commands::Replay => replay_queue().await,
            Commands::Status => show_status().await,
            Commands::Config => show_config(),
        }
    }
}

/// Build a task manager from configuration and an optional pipeline override
fn build_manager(cfg: &ResolvedConfig, pipeline: Option<PathBuf>) -> Result<TaskManager> {
    let spec = match pipeline {
        Some(path) => {
            let spec = PipelineSpec::from_file(&path)?;
            spec.validate()?;
            spec
        }
        None => cfg.pipeline()?,
    };

    let settings = StageSettings::from_config(cfg, spec.safety_limits.clone());
    let manager = TaskManager::from_spec(&spec, &StageRegistry::builtin(), &settings)?;
    Ok(manager.with_workers(cfg.workers))
}

fn make_job(path: &std::path::Path, priority: i64, recipient: &Option<String>) -> PipelineJob {
    let mut job = PipelineJob::new(path.to_string_lossy()).with_priority(priority);
    if let Some(recipient) = recipient {
        job = job.with_recipient(recipient.clone());
    }
    job
}

/// Run a single document and print the run record
async fn run_document(path: PathBuf, recipient: Option<String>, pipeline: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let manager = build_manager(cfg, pipeline)?;

    let job = make_job(&path, DEFAULT_PRIORITY, &recipient);
    let run = manager.execute_pipeline(&job).await;

    println!("{}", serde_json::to_string_pretty(&run)?);

    match run.state {
        JobState::Completed => {
            eprintln!("\n[Job {} completed in {}ms]", run.job_id, run.duration_ms.unwrap_or(0));
            Ok(())
        }
        JobState::Skipped => {
            let stage = run.skipped_at.map(|s| s.to_string()).unwrap_or_default();
            anyhow::bail!("Job {} skipped at {} stage", run.job_id, stage)
        }
        _ => anyhow::bail!(
            "Job {} failed: {}",
            run.job_id,
            run.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Run every document through the worker pool
async fn run_batch(
    paths: Vec<PathBuf>,
    workers: Option<usize>,
    priority: i64,
    recipient: Option<String>,
    pipeline: Option<PathBuf>,
) -> Result<()> {
    let cfg = config::config()?;
    let manager = Arc::new(build_manager(cfg, pipeline)?);

    let jobs = paths
        .iter()
        .map(|path| (priority, make_job(path, priority, &recipient)))
        .collect();

    let report = manager
        .run_pipeline_queue_with(jobs, workers.unwrap_or(manager.workers()))
        .await;

    println!("{:<38} {:<10} {:<10} {}", "JOB ID", "STATE", "MS", "DOCUMENT");
    println!("{}", "-".repeat(80));
    for run in &report.runs {
        println!(
            "{:<38} {:<10} {:<10} {}",
            run.job_id,
            format!("{:?}", run.state).to_lowercase(),
            run.duration_ms.unwrap_or(0),
            run.reference
        );
    }
    println!();
    println!(
        "completed: {}  skipped: {}  failed: {}  ({} workers, {}ms)",
        report.completed(),
        report.skipped(),
        report.failed(),
        report.workers,
        report.duration_ms
    );

    for executor in manager.executors() {
        let metrics = executor.metrics();
        println!(
            "  {:<15} tasks: {:<4} attempts: {:<4} timeouts: {:<3} validation: {:<3} generic: {:<3} throughput: {:.2}/s",
            executor.kind().to_string(),
            metrics.task_count,
            metrics.attempts,
            metrics.timeouts,
            metrics.validation_errors,
            metrics.generic_errors,
            metrics.throughput()
        );
    }

    if report.failed() > 0 {
        anyhow::bail!("{} job(s) failed", report.failed());
    }
    Ok(())
}

/// Publish one event
async fn publish_event(id: Option<String>, data: &str, priority: i64) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(data).context("Event data must be valid JSON")?;

    let event = match id {
        Some(id) => Event::new(id, data),
        None => Event::with_generated_id(data),
    }
    .with_priority(priority);
    let event_id = event.event_id.clone();

    let mut queue = EventQueue::open_default().await?;
    queue.publish(event).await?;

    println!("Published {} (priority {}) to {}", event_id, priority, queue.log_path().display());
    Ok(())
}

/// Drain the queue and report what happened
async fn replay_queue() -> Result<()> {
    let mut queue = EventQueue::open_default().await?;
    let consumed = queue.replay_events().await;

    for event in &consumed {
        println!("{:<8} {:<40} {}", event.priority, event.event_id, event.enqueued_at().map(|t| t.to_rfc3339()).unwrap_or_default());
    }

    let metrics = queue.get_metrics();
    println!();
    println!(
        "processed: {}  failed: {}  remaining: {}",
        metrics.processed, metrics.failed, metrics.current_queue_length
    );
    for event in queue.dead_letters() {
        println!("  dead letter: {}", event.event_id);
    }

    Ok(())
}

/// Recover the queue and show its state without consuming
async fn show_status() -> Result<()> {
    let cfg = config::config()?;
    let queue = EventQueue::open_default().await?;

    println!("Log:       {}", queue.log_path().display());
    println!("Queued:    {}", queue.len());
    if let Some(next) = queue.peek() {
        println!("Next:      {} (priority {})", next.event_id, next.priority);
    }

    let settings = StageSettings::from_config(cfg, SafetyLimits::default());
    if let Some(ref endpoint) = cfg.completion.endpoint {
        println!("Endpoint:  {}", endpoint);
    }
    println!("Completer: {}", completer_health(settings.completer.as_ref()).await);

    Ok(())
}

/// One-line health summary for a completer
async fn completer_health(completer: &dyn Completer) -> String {
    match completer.health_check().await {
        Ok(()) => format!("{} (ok)", completer.name()),
        Err(e) => format!("{} (unreachable: {:#})", completer.name(), e),
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("docflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("{}", serde_yaml::to_string(cfg)?);

    Ok(())
}
