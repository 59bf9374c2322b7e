//! Configuration for docflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DOCFLOW_HOME, DOCFLOW_WORKERS,
//!    DOCFLOW_COMPLETION_ENDPOINT, DOCFLOW_COMPLETION_TOKEN)
//! 2. Config file (.docflow/config.yaml)
//! 3. Defaults (~/.docflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .docflow/config.yaml
//! - Paths in config file are relative to the .docflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::pipeline::PipelineSpec;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "DOCFLOW_HOME";
pub const ENV_WORKERS: &str = "DOCFLOW_WORKERS";
pub const ENV_COMPLETION_ENDPOINT: &str = "DOCFLOW_COMPLETION_ENDPOINT";
pub const ENV_COMPLETION_TOKEN: &str = "DOCFLOW_COMPLETION_TOKEN";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub completion: Option<CompletionConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .docflow/)
    pub home: Option<String>,
    /// Event log file (relative to .docflow/)
    pub event_log: Option<String>,
    /// Pipeline definition YAML (relative to .docflow/)
    pub pipeline: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub dedup_on_recovery: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    pub endpoint: Option<String>,
    pub models: Option<Vec<String>>,
    pub cost_rate: Option<f64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub capacity: Option<usize>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub signature: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to docflow home (engine state)
    pub home: PathBuf,
    /// Persistence log for the event queue
    pub event_log: PathBuf,
    /// Pipeline definition, if one is configured
    pub pipeline_file: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub queue: QueueSettings,
    /// Worker pool size
    pub workers: usize,
    pub completion: CompletionSettings,
    pub cache: CacheSettings,
    /// Sign-off line for drafted emails
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSettings {
    pub dedup_on_recovery: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionSettings {
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub models: Vec<String>,
    pub cost_rate: f64,
    pub timeout_seconds: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            models: vec!["primary".to_string(), "fallback".to_string()],
            cost_rate: 0.00002,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_seconds: Some(3600),
        }
    }
}

pub const DEFAULT_WORKERS: usize = 3;

/// Environment overrides, captured separately so resolution stays pure
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<String>,
    pub workers: Option<String>,
    pub completion_endpoint: Option<String>,
    pub completion_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            home: var(ENV_HOME),
            workers: var(ENV_WORKERS),
            completion_endpoint: var(ENV_COMPLETION_ENDPOINT),
            completion_token: var(ENV_COMPLETION_TOKEN),
        }
    }
}

impl ResolvedConfig {
    /// Load the configured pipeline, or the built-in three-stage default
    pub fn pipeline(&self) -> Result<PipelineSpec> {
        let spec = match self.pipeline_file {
            Some(ref path) => PipelineSpec::from_file(path)?,
            None => PipelineSpec::default(),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".docflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file settings, environment overrides and defaults
///
/// `file` is the parsed config file and its path, if one was found.
pub fn resolve(
    file: Option<(ConfigFile, PathBuf)>,
    env: &EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config, config_file) = match file {
        Some((config, path)) => (config, Some(path)),
        None => (ConfigFile::default(), None),
    };

    // Relative paths in the file are anchored at .docflow/
    let anchor = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    let from_file = |value: &Option<String>| -> Option<PathBuf> {
        let value = value.as_deref()?;
        Some(match anchor {
            Some(ref dir) => resolve_path(dir, value),
            None => PathBuf::from(value),
        })
    };

    let home = match env.home {
        Some(ref env_home) => PathBuf::from(env_home),
        None => from_file(&config.paths.home).unwrap_or(default_home),
    };

    let event_log = from_file(&config.paths.event_log).unwrap_or_else(|| home.join("events.jsonl"));
    let pipeline_file = from_file(&config.paths.pipeline);

    let queue = QueueSettings {
        dedup_on_recovery: config
            .queue
            .as_ref()
            .and_then(|q| q.dedup_on_recovery)
            .unwrap_or(false),
    };

    let workers = match env.workers {
        Some(ref raw) => raw
            .parse::<usize>()
            .with_context(|| format!("{} must be a positive integer, got '{}'", ENV_WORKERS, raw))?,
        None => config
            .pool
            .as_ref()
            .and_then(|p| p.workers)
            .unwrap_or(DEFAULT_WORKERS),
    };
    if workers == 0 {
        anyhow::bail!("Worker pool size must be at least 1");
    }

    let defaults = CompletionSettings::default();
    let file_completion = config.completion.as_ref();
    let completion = CompletionSettings {
        endpoint: env
            .completion_endpoint
            .clone()
            .or_else(|| file_completion.and_then(|c| c.endpoint.clone())),
        token: env.completion_token.clone(),
        models: file_completion
            .and_then(|c| c.models.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.models),
        cost_rate: file_completion
            .and_then(|c| c.cost_rate)
            .unwrap_or(defaults.cost_rate),
        timeout_seconds: file_completion
            .and_then(|c| c.timeout_seconds)
            .unwrap_or(defaults.timeout_seconds),
    };

    let cache_defaults = CacheSettings::default();
    let cache = match config.cache {
        Some(ref c) => CacheSettings {
            capacity: c.capacity.unwrap_or(cache_defaults.capacity),
            ttl_seconds: c.ttl_seconds.or(cache_defaults.ttl_seconds),
        },
        None => cache_defaults,
    };

    let signature = config
        .notification
        .as_ref()
        .and_then(|n| n.signature.clone())
        .unwrap_or_else(|| crate::stages::notify::DEFAULT_SIGNATURE.to_string());

    Ok(ResolvedConfig {
        home,
        event_log,
        pipeline_file,
        config_file,
        queue,
        workers,
        completion,
        cache,
        signature,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".docflow");

    let file = match find_config_file() {
        Some(path) => Some((load_config_file(&path)?, path)),
        None => None,
    };

    resolve(file, &EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
