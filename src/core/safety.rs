//! Safety limits applied to stage inputs and outputs.
//!
//! Guards against runaway payloads and sensitive files through
//! configurable limits on:
//! - Input/output sizes
//! - Denylist patterns (to avoid ingesting secrets)

use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum input size in bytes (default: 10MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum output size in bytes (default: 10MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Glob patterns to reject (files matching these won't be ingested)
    #[serde(default = "default_denylist")]
    pub denylist_patterns: Vec<String>,
}

fn default_max_input_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_max_output_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB

fn default_denylist() -> Vec<String> {
    vec![
        "**/.env*".to_string(),
        "**/secrets*".to_string(),
        "**/*credential*".to_string(),
        "**/*.pem".to_string(),
        "**/*.key".to_string(),
    ]
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            denylist_patterns: default_denylist(),
        }
    }
}

impl SafetyLimits {
    /// Check if a path matches any denylist pattern
    pub fn is_denylisted(&self, path: &str) -> bool {
        for pattern_str in &self.denylist_patterns {
            if let Ok(pattern) = Pattern::new(pattern_str) {
                if pattern.matches(path) {
                    return true;
                }
            }
        }
        false
    }

    /// Validate input size, and the source path against the denylist
    pub fn validate_input(&self, size: u64, source_path: Option<&Path>) -> Result<(), SafetyViolation> {
        if size > self.max_input_bytes {
            return Err(SafetyViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }

        if let Some(path) = source_path {
            let path_str = path.to_string_lossy();
            if self.is_denylisted(&path_str) {
                return Err(SafetyViolation::DenylistMatch {
                    path: path_str.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Validate output against size limits
    pub fn validate_output(&self, size: u64) -> Result<(), SafetyViolation> {
        if size > self.max_output_bytes {
            return Err(SafetyViolation::MaxOutputBytes {
                actual: size,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }
}

/// Safety violation errors
#[derive(Debug, Clone, Error)]
pub enum SafetyViolation {
    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum output bytes exceeded: {actual} > {limit}")]
    MaxOutputBytes { actual: u64, limit: u64 },

    #[error("Path matches denylist pattern: {path}")]
    DenylistMatch { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = SafetyLimits::default();
        assert_eq!(limits.max_input_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.denylist_patterns.len(), 5);
    }

    #[test]
    fn test_denylist_matching() {
        let limits = SafetyLimits::default();

        assert!(limits.is_denylisted(".env"));
        assert!(limits.is_denylisted(".env.local"));
        assert!(limits.is_denylisted("config/secrets.json"));
        assert!(limits.is_denylisted("keys/server.key"));
        assert!(limits.is_denylisted("certs/server.pem"));

        assert!(!limits.is_denylisted("notes.txt"));
        assert!(!limits.is_denylisted("reports/q3.md"));
    }

    #[test]
    fn test_input_validation() {
        let limits = SafetyLimits {
            max_input_bytes: 100,
            ..Default::default()
        };

        assert!(limits.validate_input(5, None).is_ok());

        let result = limits.validate_input(200, None);
        assert!(matches!(result, Err(SafetyViolation::MaxInputBytes { .. })));

        let result = limits.validate_input(5, Some(Path::new("deploy/.env")));
        assert!(matches!(result, Err(SafetyViolation::DenylistMatch { .. })));
    }

    #[test]
    fn test_output_validation() {
        let limits = SafetyLimits {
            max_output_bytes: 10,
            ..Default::default()
        };

        assert!(limits.validate_output(10).is_ok());
        assert!(matches!(
            limits.validate_output(11),
            Err(SafetyViolation::MaxOutputBytes { .. })
        ));
    }
}
