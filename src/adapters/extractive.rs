//! Offline completer that summarizes by extraction.
//!
//! Returns the leading sentences of the prompt's document text. No network,
//! no model; the `model` argument is ignored.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{AdapterOutput, Completer};

/// Marker separating the instruction from the document in a prompt
pub const DOCUMENT_MARKER: &str = "\n\n---\n";

pub struct ExtractiveCompleter {
    max_sentences: usize,
}

impl Default for ExtractiveCompleter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ExtractiveCompleter {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    fn extract(&self, text: &str) -> String {
        let mut sentences = Vec::new();
        let mut current = String::new();

        for ch in text.chars() {
            current.push(ch);
            if matches!(ch, '.' | '!' | '?') {
                let sentence = current.split_whitespace().collect::<Vec<_>>().join(" ");
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
                if sentences.len() == self.max_sentences {
                    break;
                }
            }
        }

        if sentences.len() < self.max_sentences {
            let rest = current.split_whitespace().collect::<Vec<_>>().join(" ");
            if !rest.is_empty() {
                sentences.push(rest);
            }
        }

        sentences.join(" ")
    }
}

#[async_trait]
impl Completer for ExtractiveCompleter {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, _model: &str, prompt: &str, _timeout: Duration) -> Result<AdapterOutput> {
        let text = prompt
            .split_once(DOCUMENT_MARKER)
            .map(|(_, doc)| doc)
            .unwrap_or(prompt);

        let content = self.extract(text);
        let tokens = content.split_whitespace().count() as u64;
        Ok(AdapterOutput::new(content).with_tokens(tokens))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
