//! Error types for provisioning.
//!
//! Configuration-time errors ([`GraphError`]) abort before any step runs.
//! Execution-time errors ([`StepError`]) end the traversal and end up in the
//! report as the failed step's detail.

use thiserror::Error;

/// Errors raised while building a [`DependencyGraph`](super::graph::DependencyGraph).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("step '{step}' requires unknown step '{missing}'")]
    UnknownPrerequisite { step: String, missing: String },

    #[error("duplicate step identifier: {0}")]
    DuplicateStep(String),

    #[error("invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("step '{step}' provides artifact '{artifact}' but has no path for it")]
    MissingArtifactPath { step: String, artifact: String },
}

/// Errors raised by [`EnvironmentContext`](super::context::EnvironmentContext) lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("unterminated variable reference in: {0}")]
    Unterminated(String),
}

/// Errors raised while executing a single step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("[{step}] fetch failed: {cause:#}")]
    Fetch { step: String, cause: anyhow::Error },

    #[error("[{step}] installer failed: {cause:#}")]
    Installer { step: String, cause: anyhow::Error },

    #[error("[{step}] unpack failed: {cause:#}")]
    Unpack { step: String, cause: anyhow::Error },

    #[error("[{step}] permission change failed: {cause:#}")]
    Permission { step: String, cause: anyhow::Error },

    #[error("[{step}] {source}")]
    Environment {
        step: String,
        #[source]
        source: ContextError,
    },
}

impl StepError {
    /// Short category name, used in the report.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Installer { .. } => "installer",
            Self::Unpack { .. } => "unpack",
            Self::Permission { .. } => "permission",
            Self::Environment { .. } => "environment",
        }
    }
}
