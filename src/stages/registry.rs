//! Static stage registry.
//!
//! Maps each [`StageKind`] to a constructor. The table is fixed at compile
//! time and resolved once at startup; nothing is discovered at run time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::adapters::{Completer, ExtractiveCompleter, HttpCompleter};
use crate::cache::{BoundedCache, StageCache};
use crate::config::ResolvedConfig;
use crate::core::safety::SafetyLimits;
use crate::domain::StageKind;

use super::notify::DEFAULT_SIGNATURE;
use super::{DocumentIngestStage, EmailStage, Stage, SummarizeStage};

/// Builds a stage from shared settings
pub type StageFactory = fn(&StageSettings) -> anyhow::Result<Arc<dyn Stage>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No stage registered for '{0}'")]
    MissingStage(StageKind),

    #[error("Failed to construct '{kind}' stage: {message}")]
    Construction { kind: StageKind, message: String },

    #[error("Factory for '{expected}' built a '{actual}' stage")]
    KindMismatch { expected: StageKind, actual: StageKind },
}

/// Collaborators and knobs shared by stage constructors
#[derive(Clone)]
pub struct StageSettings {
    pub limits: SafetyLimits,
    pub cache: Arc<dyn StageCache>,
    pub completer: Arc<dyn Completer>,
    pub models: Vec<String>,
    pub cost_rate: f64,
    pub completion_timeout: Duration,
    pub signature: String,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            limits: SafetyLimits::default(),
            cache: Arc::new(BoundedCache::new(256)),
            completer: Arc::new(ExtractiveCompleter::default()),
            models: vec!["default".to_string()],
            cost_rate: 0.0,
            completion_timeout: Duration::from_secs(30),
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

impl StageSettings {
    /// Settings from the resolved configuration
    ///
    /// Uses the HTTP completer when an endpoint is configured and the
    /// extractive completer otherwise.
    pub fn from_config(config: &ResolvedConfig, limits: SafetyLimits) -> Self {
        let completer: Arc<dyn Completer> = match config.completion.endpoint {
            Some(ref endpoint) => {
                let mut http = HttpCompleter::new(endpoint.clone());
                if let Some(ref token) = config.completion.token {
                    http = http.with_token(token.clone());
                }
                Arc::new(http)
            }
            None => Arc::new(ExtractiveCompleter::default()),
        };

        let mut cache = BoundedCache::new(config.cache.capacity);
        if let Some(ttl) = config.cache.ttl_seconds {
            cache = cache.with_ttl(Duration::from_secs(ttl));
        }

        Self {
            limits,
            cache: Arc::new(cache),
            completer,
            models: config.completion.models.clone(),
            cost_rate: config.completion.cost_rate,
            completion_timeout: Duration::from_secs(config.completion.timeout_seconds),
            signature: config.signature.clone(),
        }
    }
}

fn build_ingest(settings: &StageSettings) -> anyhow::Result<Arc<dyn Stage>> {
    Ok(Arc::new(DocumentIngestStage::new(settings.limits.clone())))
}

fn build_summarize(settings: &StageSettings) -> anyhow::Result<Arc<dyn Stage>> {
    if settings.models.is_empty() {
        anyhow::bail!("at least one completion model is required");
    }
    Ok(Arc::new(
        SummarizeStage::new(
            settings.completer.clone(),
            settings.models.clone(),
            settings.cache.clone(),
        )
        .with_cost_rate(settings.cost_rate)
        .with_call_timeout(settings.completion_timeout),
    ))
}

fn build_email(settings: &StageSettings) -> anyhow::Result<Arc<dyn Stage>> {
    Ok(Arc::new(EmailStage::new(settings.signature.clone())))
}

const BUILTIN: [(StageKind, StageFactory); 3] = [
    (StageKind::Ingestion, build_ingest),
    (StageKind::Transformation, build_summarize),
    (StageKind::Notification, build_email),
];

/// Stage-kind to constructor table
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<StageKind, StageFactory>,
}

impl StageRegistry {
    /// A registry with nothing registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in ingest, summarize and email stages
    pub fn builtin() -> Self {
        Self {
            factories: BUILTIN.into_iter().collect(),
        }
    }

    /// Register (or replace) the factory for `kind`
    pub fn register(mut self, kind: StageKind, factory: StageFactory) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Construct the stage for `kind`
    pub fn build(&self, kind: StageKind, settings: &StageSettings) -> Result<Arc<dyn Stage>, RegistryError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(RegistryError::MissingStage(kind))?;

        let stage = factory(settings).map_err(|e| RegistryError::Construction {
            kind,
            message: format!("{:#}", e),
        })?;

        if stage.kind() != kind {
            return Err(RegistryError::KindMismatch {
                expected: kind,
                actual: stage.kind(),
            });
        }

        Ok(stage)
    }

    /// Construct every stage in pipeline order
    pub fn resolve_all(&self, settings: &StageSettings) -> Result<Vec<Arc<dyn Stage>>, RegistryError> {
        StageKind::ORDER
            .iter()
            .map(|&kind| self.build(kind, settings))
            .collect()
    }
}
