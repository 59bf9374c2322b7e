//! Payloads passed between pipeline stages.
//!
//! Each stage consumes one shape and produces the next:
//! `Reference -> Document -> Summary -> Notification`.

use serde::{Deserialize, Serialize};

/// Metadata carried alongside a document through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Base name of the source file
    pub file_name: String,

    /// Lowercased extension of the source file
    pub file_type: String,

    /// Notification address, if the job asked for one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Cost of the completion calls made for this document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Data flowing into and out of a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Payload {
    /// A document reference waiting to be ingested
    Reference {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },

    /// Extracted document text
    Document { text: String, metadata: Metadata },

    /// Condensed form of a document
    Summary { summary: String, metadata: Metadata },

    /// Message ready for delivery
    Notification {
        subject: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
}

impl Payload {
    /// Short tag naming the payload shape (used in logs and errors)
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Reference { .. } => "reference",
            Self::Document { .. } => "document",
            Self::Summary { .. } => "summary",
            Self::Notification { .. } => "notification",
        }
    }

    /// Size of the textual content, for limit checks
    pub fn content_len(&self) -> usize {
        match self {
            Self::Reference { path, .. } => path.len(),
            Self::Document { text, .. } => text.len(),
            Self::Summary { summary, .. } => summary.len(),
            Self::Notification { subject, body, .. } => subject.len() + body.len(),
        }
    }

    /// Whether the payload carries no usable content
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Reference { path, .. } => path.trim().is_empty(),
            Self::Document { text, .. } => text.trim().is_empty(),
            Self::Summary { summary, .. } => summary.trim().is_empty(),
            Self::Notification { subject, body, .. } => {
                subject.trim().is_empty() || body.trim().is_empty()
            }
        }
    }
}
