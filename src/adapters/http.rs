//! HTTP completion client.
//!
//! Endpoint: POST `{endpoint}` with `{"model": ..., "prompt": ...}`
//! Auth: optional Bearer token

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AdapterOutput, Completer};

/// Completion client for a JSON-over-HTTP service
pub struct HttpCompleter {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(alias = "text")]
    content: String,
    #[serde(default)]
    tokens_used: Option<u64>,
    #[serde(default)]
    cost_usd: Option<f64>,
}

impl HttpCompleter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl Completer for HttpCompleter {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, model: &str, prompt: &str, timeout: Duration) -> Result<AdapterOutput> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&CompletionRequest { model, prompt });

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach completion endpoint {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion error ({}): {}", status, text);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .context("Failed to decode completion response")?;

        Ok(AdapterOutput {
            content: body.content,
            tokens_used: body.tokens_used,
            cost_usd: body.cost_usd,
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .head(&self.endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .with_context(|| format!("Completion endpoint {} unreachable", self.endpoint))?;
        Ok(())
    }
}
