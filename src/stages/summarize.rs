//! Summarization stage.
//!
//! Condenses a `Document` into a `Summary` through a [`Completer`], trying
//! each configured model in order. Results are memoized in the injected
//! [`StageCache`] by the SHA256 of the document text.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::extractive::DOCUMENT_MARKER;
use crate::adapters::Completer;
use crate::cache::{cache_key, StageCache};
use crate::domain::{Payload, StageKind};

use super::{Stage, StageError};

/// Summaries shorter than this are rejected
pub const MIN_SUMMARY_WORDS: usize = 5;

const INSTRUCTION: &str = "Summarize the following document.";

#[derive(Debug, Serialize, Deserialize)]
struct CachedSummary {
    summary: String,
    cost_usd: Option<f64>,
}

pub struct SummarizeStage {
    completer: Arc<dyn Completer>,
    models: Vec<String>,
    cache: Arc<dyn StageCache>,
    /// USD per token, used when the service doesn't report a cost
    cost_rate: f64,
    call_timeout: Duration,
}

impl SummarizeStage {
    pub fn new(completer: Arc<dyn Completer>, models: Vec<String>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            completer,
            models,
            cache,
            cost_rate: 0.0,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_cost_rate(mut self, cost_rate: f64) -> Self {
        self.cost_rate = cost_rate;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Try each model in order, returning the first acceptable summary
    async fn summarize(&self, text: &str) -> Result<CachedSummary> {
        let prompt = format!("{}{}{}", INSTRUCTION, DOCUMENT_MARKER, text);
        let mut last_error = None;

        for model in &self.models {
            match self.completer.complete(model, &prompt, self.call_timeout).await {
                Ok(output) => {
                    let words = output.content.split_whitespace().count();
                    if words < MIN_SUMMARY_WORDS {
                        warn!(model = %model, words, "Summary too short");
                        last_error = Some(anyhow::Error::new(StageError::Validation(format!(
                            "summary from {} has {} words, need at least {}",
                            model, words, MIN_SUMMARY_WORDS
                        ))));
                        continue;
                    }

                    let cost_usd = output.cost_usd.or_else(|| {
                        output.tokens_used.map(|tokens| tokens as f64 * self.cost_rate)
                    });
                    debug!(model = %model, words, cost_usd = ?cost_usd, "Summary produced");

                    return Ok(CachedSummary {
                        summary: output.content.trim().to_string(),
                        cost_usd,
                    });
                }
                Err(e) => {
                    warn!(model = %model, error = %format!("{:#}", e), "Model failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No summarization models configured")))
    }
}

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Transformation
    }

    fn name(&self) -> &str {
        "summarize"
    }

    async fn process(&self, input: Payload) -> Result<Payload> {
        let (text, mut metadata) = match input {
            Payload::Document { text, metadata } => (text, metadata),
            other => {
                return Err(StageError::Validation(format!("expected document, got {}", other.shape())).into())
            }
        };

        let key = cache_key(&text);
        let cached = self
            .cache
            .get(&key)
            .and_then(|raw| serde_json::from_str::<CachedSummary>(&raw).ok());

        let result = match cached {
            Some(hit) => {
                debug!(file = %metadata.file_name, "Summary cache hit");
                hit
            }
            None => {
                let fresh = self.summarize(&text).await?;
                self.cache.put(key, serde_json::to_string(&fresh)?);
                fresh
            }
        };

        metadata.cost_usd = result.cost_usd;
        Ok(Payload::Summary {
            summary: result.summary,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterOutput;
    use crate::cache::BoundedCache;
    use crate::domain::Metadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails for models named "broken", echoes a fixed reply otherwise
    struct ScriptedCompleter {
        reply: String,
        calls: AtomicUsize,
    }

    impl ScriptedCompleter {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Completer for ScriptedCompleter {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, model: &str, _prompt: &str, _timeout: Duration) -> Result<AdapterOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if model == "broken" {
                anyhow::bail!("model unavailable");
            }
            Ok(AdapterOutput::new(self.reply.clone()).with_tokens(100))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn document(text: &str) -> Payload {
        Payload::Document {
            text: text.to_string(),
            metadata: Metadata {
                file_name: "a.txt".to_string(),
                file_type: "txt".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_fallback_model_and_cost() {
        let completer = Arc::new(ScriptedCompleter::new("the five word summary here"));
        let stage = SummarizeStage::new(
            completer.clone(),
            vec!["broken".to_string(), "backup".to_string()],
            Arc::new(BoundedCache::new(8)),
        )
        .with_cost_rate(0.5);

        let output = stage.process(document("long text")).await.unwrap();

        let Payload::Summary { summary, metadata } = output else {
            panic!("expected summary");
        };
        assert_eq!(summary, "the five word summary here");
        assert_eq!(metadata.cost_usd, Some(50.0));
        assert_eq!(metadata.file_name, "a.txt");
        assert_eq!(completer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_completion() {
        let completer = Arc::new(ScriptedCompleter::new("one two three four five six"));
        let stage = SummarizeStage::new(
            completer.clone(),
            vec!["main".to_string()],
            Arc::new(BoundedCache::new(8)),
        );

        let first = stage.process(document("same text")).await.unwrap();
        let second = stage.process(document("same text")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_summary_is_validation_error() {
        let completer = Arc::new(ScriptedCompleter::new("too short"));
        let stage = SummarizeStage::new(
            completer,
            vec!["main".to_string()],
            Arc::new(BoundedCache::new(8)),
        );

        let err = stage.process(document("text")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::Validation(_))
        ));
    }
}
