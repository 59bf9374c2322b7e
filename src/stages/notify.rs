//! Notification stage: drafts an email from a summary.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Payload, StageKind};

use super::{check_shape, input_shape, Stage, StageError};

pub const DEFAULT_SIGNATURE: &str = "docflow";

pub struct EmailStage {
    signature: String,
}

impl Default for EmailStage {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE)
    }
}

impl EmailStage {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

/// Accepts `local@domain` with non-empty parts and a dotted domain
pub fn is_valid_recipient(recipient: &str) -> bool {
    let recipient = recipient.trim();
    if recipient.is_empty() || recipient.chars().any(char::is_whitespace) {
        return false;
    }
    match recipient.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[async_trait]
impl Stage for EmailStage {
    fn kind(&self) -> StageKind {
        StageKind::Notification
    }

    fn name(&self) -> &str {
        "email"
    }

    fn validate_input(&self, input: &Payload) -> Result<(), StageError> {
        check_shape(input, input_shape(self.kind()))?;

        if let Payload::Summary { metadata, .. } = input {
            if let Some(ref recipient) = metadata.recipient {
                if !is_valid_recipient(recipient) {
                    return Err(StageError::Validation(format!(
                        "malformed recipient address: '{}'",
                        recipient
                    )));
                }
            }
        }
        Ok(())
    }

    async fn process(&self, input: Payload) -> Result<Payload> {
        let (summary, metadata) = match input {
            Payload::Summary { summary, metadata } => (summary, metadata),
            other => {
                return Err(StageError::Validation(format!("expected summary, got {}", other.shape())).into())
            }
        };

        let subject = format!("Summary: {}", metadata.file_name);
        let body = format!(
            "Dear Team,\n\nHere is the summary of the document '{}':\n\n{}\n\nBest Regards,\n{}",
            metadata.file_name, summary, self.signature
        );

        Ok(Payload::Notification {
            subject,
            body,
            recipient: metadata.recipient,
        })
    }
}
