//! Adapter interfaces for external completion services.
//!
//! The summarization stage talks to a [`Completer`] rather than a concrete
//! provider, so the HTTP client and the offline extractive summarizer are
//! interchangeable.

pub mod extractive;
pub mod http;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use extractive::ExtractiveCompleter;
pub use http::HttpCompleter;

/// Output from a completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutput {
    /// The content returned by the service
    pub content: String,

    /// Tokens used (if available)
    pub tokens_used: Option<u64>,

    /// Cost in USD (if the service reports it)
    pub cost_usd: Option<f64>,
}

impl AdapterOutput {
    /// Create a new adapter output with just content
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
            cost_usd: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }
}

/// A text completion service
#[async_trait]
pub trait Completer: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Ask `model` to complete `prompt` within `timeout`
    async fn complete(&self, model: &str, prompt: &str, timeout: Duration) -> Result<AdapterOutput>;

    /// Health check (for HTTP adapters)
    async fn health_check(&self) -> Result<()>;
}
