//! Execution settings for compiled graphs
//!
//! Settings come from defaults, an optional YAML file and `STATEGRAPH_*`
//! environment overrides, in that order:
//!
//! ```yaml
//! max_steps: 50
//! max_concurrency: 4
//! join_policy: tolerate
//! ```

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Default bound on node executions per call
pub const DEFAULT_MAX_STEPS: usize = 25;

/// What a fan-out join does when some branches fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Any failed branch fails the join; the parent stays before the fan-out
    #[default]
    Abort,
    /// Merge the branches that succeeded, record the rest, and continue
    Tolerate,
}

impl std::str::FromStr for JoinPolicy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(JoinPolicy::Abort),
            "tolerate" => Ok(JoinPolicy::Tolerate),
            other => Err(GraphError::Configuration(format!(
                "unknown join policy '{}', expected 'abort' or 'tolerate'",
                other
            ))),
        }
    }
}

/// Execution limits and failure policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Node executions allowed per call, on the parent flow and per branch
    pub max_steps: usize,

    /// Fan-out branches running at once; `None` runs them all together
    pub max_concurrency: Option<usize>,

    pub join_policy: JoinPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_concurrency: None,
            join_policy: JoinPolicy::Abort,
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = policy;
        self
    }

    /// Parse a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GraphError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - STATEGRAPH_MAX_STEPS: Node executions per call
    /// - STATEGRAPH_MAX_CONCURRENCY: Parallel fan-out branches (0 = unbounded)
    /// - STATEGRAPH_JOIN_POLICY: `abort` or `tolerate`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(steps) = env::var("STATEGRAPH_MAX_STEPS") {
            self.max_steps = parse_usize("STATEGRAPH_MAX_STEPS", &steps)?;
        }

        if let Ok(limit) = env::var("STATEGRAPH_MAX_CONCURRENCY") {
            self.max_concurrency = match parse_usize("STATEGRAPH_MAX_CONCURRENCY", &limit)? {
                0 => None,
                n => Some(n),
            };
        }

        if let Ok(policy) = env::var("STATEGRAPH_JOIN_POLICY") {
            self.join_policy = policy.parse()?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(GraphError::Configuration(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(GraphError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(var: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|e| {
        GraphError::Configuration(format!("{} must be a non-negative integer: {}", var, e))
    })
}
