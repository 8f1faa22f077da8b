//! Error hierarchy for the attune context engine.
//!
//! One shared taxonomy is used across the workspace. Propagation rules
//! differ per variant and are enforced by the callers:
//!
//! - [`EngineError::Validation`] and [`EngineError::NotFound`] abort an
//!   orchestration immediately.
//! - [`EngineError::StageTimeout`] / [`EngineError::Stage`] are recovered
//!   under a graceful fallback policy and fatal under strict.
//! - [`EngineError::Persistence`] is always recovered locally (logged only);
//!   a durable write never blocks or fails the user-visible response.

use thiserror::Error;

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the context engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Input or output failed validation (empty after sanitization).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity (prompt, pipeline, session) does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"prompt"` or `"pipeline"`.
        kind: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// A pipeline stage exceeded its deadline.
    ///
    /// The stage computation is signalled to stop but is not guaranteed to
    /// have terminated when this error is reported — it is abandoned, and
    /// its side effects (if any) may still land afterwards.
    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// Name of the stage that timed out.
        stage: String,
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A pipeline stage (or an adaptation rule) failed.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Underlying error message.
        message: String,
    },

    /// A storage read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Build a [`EngineError::Stage`] from a stage name and any displayable error.
    pub fn stage(stage: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: err.to_string(),
        }
    }

    /// Build a [`EngineError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is recoverable under a graceful fallback policy.
    ///
    /// Validation and not-found errors always abort; stage errors and
    /// timeouts are recoverable when the pipeline says so.
    #[must_use]
    pub fn is_stage_recoverable(&self) -> bool {
        matches!(self, Self::StageTimeout { .. } | Self::Stage { .. })
    }
}
