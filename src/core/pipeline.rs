//! Pipeline definitions and loading.
//!
//! A pipeline is defined in YAML and lists its stages by kind, each with its
//! own retry policy and timeout. Stages always run in the fixed order
//! ingestion -> transformation -> notification.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::StageKind;

use super::safety::SafetyLimits;

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name (used in logs)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Safety limits applied to every stage
    #[serde(default)]
    pub safety_limits: SafetyLimits,

    /// Timeout for stages that don't set their own
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    /// Ordered list of stages
    pub stages: Vec<StageSpec>,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            name: "document".to_string(),
            description: "Ingest, summarize and notify".to_string(),
            safety_limits: SafetyLimits::default(),
            default_timeout_seconds: default_timeout_seconds(),
            stages: StageKind::ORDER.iter().map(|&kind| StageSpec::new(kind)).collect(),
        }
    }
}

impl PipelineSpec {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        let kinds: Vec<StageKind> = self.stages.iter().map(|s| s.kind).collect();
        if kinds != StageKind::ORDER {
            anyhow::bail!(
                "Pipeline '{}' must list stages as ingestion, transformation, notification (got {:?})",
                self.name,
                kinds
            );
        }

        for stage in &self.stages {
            if stage.retry_policy.max_attempts == 0 {
                anyhow::bail!("Stage '{}' must allow at least one attempt", stage.kind);
            }
            if stage.timeout_seconds == Some(0) {
                anyhow::bail!("Stage '{}' has a zero timeout", stage.kind);
            }
        }

        Ok(())
    }

    /// Get a stage by kind
    pub fn stage(&self, kind: StageKind) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.kind == kind)
    }
}

/// A single stage in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Which registered stage to run
    pub kind: StageKind,

    /// Retry policy for this stage
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Override timeout for this stage (uses default_timeout_seconds if not set)
    pub timeout_seconds: Option<u64>,
}

impl StageSpec {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            retry_policy: RetryPolicy::default(),
            timeout_seconds: None,
        }
    }

    /// Get the effective timeout for this stage
    pub fn timeout(&self, default_seconds: u64) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(default_seconds))
    }
}

/// Retry policy for failed stage attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` and a fixed base delay
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Calculate delay after a failed attempt (1-indexed)
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
