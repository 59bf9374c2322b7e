//! Pipeline stages.
//!
//! A stage is anything that satisfies `process(input) -> output` for one
//! [`StageKind`]. The built-in stages are:
//! - `ingest`: Reads a document reference into text
//! - `summarize`: Condenses text through a completion service
//! - `notify`: Drafts an email from a summary
//!
//! Stages are constructed through the static [`StageRegistry`].

pub mod ingest;
pub mod notify;
pub mod registry;
pub mod summarize;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::safety::SafetyViolation;
use crate::domain::{Payload, StageKind};

pub use ingest::DocumentIngestStage;
pub use notify::EmailStage;
pub use registry::{RegistryError, StageFactory, StageRegistry, StageSettings};
pub use summarize::SummarizeStage;

/// The bounded failure taxonomy every raw stage error maps into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The call exceeded its time bound
    Timeout,

    /// Malformed input or output
    Validation,

    /// Anything else, including external service failures
    Generic,
}

/// Errors raised by stages and the retry executor
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stage timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("No text extracted from {0}")]
    EmptyExtraction(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Safety(#[from] SafetyViolation),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl StageError {
    /// Where this error sits in the taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Validation(_)
            | Self::UnsupportedType(_)
            | Self::EmptyExtraction(_)
            | Self::Safety(_) => ErrorClass::Validation,
            Self::NotFound(_) | Self::Runtime(_) => ErrorClass::Generic,
        }
    }
}

/// Shape a stage of `kind` accepts
pub fn input_shape(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Ingestion => "reference",
        StageKind::Transformation => "document",
        StageKind::Notification => "summary",
    }
}

/// Shape a stage of `kind` produces
pub fn output_shape(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Ingestion => "document",
        StageKind::Transformation => "summary",
        StageKind::Notification => "notification",
    }
}

/// Reject payloads that are the wrong shape or carry no content
pub fn check_shape(payload: &Payload, expected: &str) -> Result<(), StageError> {
    if payload.shape() != expected {
        return Err(StageError::Validation(format!(
            "expected a {} payload, got {}",
            expected,
            payload.shape()
        )));
    }
    if payload.is_blank() {
        return Err(StageError::Validation(format!("{} payload is empty", expected)));
    }
    Ok(())
}

/// A single pipeline step
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which slot of the pipeline this stage fills
    fn kind(&self) -> StageKind;

    /// Human-readable stage name
    fn name(&self) -> &str;

    /// Check the input before any attempt is made
    fn validate_input(&self, input: &Payload) -> Result<(), StageError> {
        check_shape(input, input_shape(self.kind()))
    }

    /// Check a produced output; a failure here consumes an attempt
    fn validate_output(&self, output: &Payload) -> Result<(), StageError> {
        check_shape(output, output_shape(self.kind()))
    }

    /// Do the work
    async fn process(&self, input: Payload) -> Result<Payload>;
}
