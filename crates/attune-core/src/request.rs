//! Request/response types for the orchestration entry point.

use serde::{Deserialize, Serialize};

use crate::context::ContextMap;

/// Incoming context-enrichment request.
///
/// This is the shape the API layer (out of scope) hands to
/// `PipelineOrchestrator::orchestrate`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    /// Prompt to enrich.
    pub prompt_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Session, if the client already has one. Filled deterministically
    /// during preprocessing when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Raw user input for this turn.
    pub current_input: String,
    /// Context keys the caller explicitly wants included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_context: Option<Vec<String>>,
    /// Request-scoped preferences. Defaults to empty during preprocessing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<ContextMap>,
}

impl ContextRequest {
    /// Minimal request constructor.
    #[must_use]
    pub fn new(
        prompt_id: impl Into<String>,
        user_id: impl Into<String>,
        current_input: impl Into<String>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            user_id: user_id.into(),
            session_id: None,
            current_input: current_input.into(),
            required_context: None,
            preferences: None,
        }
    }
}

/// Result of context processing for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    /// Final assembled content.
    pub content: String,
    /// The dynamic context the content was assembled against.
    pub context_used: ContextMap,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// Names of the context sources that contributed.
    pub context_sources: Vec<String>,
    /// Number of adaptation rules that fired.
    pub rules_applied: usize,
}

/// One recorded stage failure.
///
/// The error is stored in string form so the result stays serializable
/// for the API layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    /// Stage (or phase) that failed.
    pub stage: String,
    /// Error description.
    pub error: String,
}

/// Outcome of one orchestration call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    /// Whether the orchestration produced a usable response.
    ///
    /// Graceful stage failures do not flip this — only validation errors,
    /// unknown pipelines, strict-mode stage failures, or a processor
    /// failure do.
    pub success: bool,
    /// Final payload when successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ContextResponse>,
    /// Stage names actually executed, in order. Skipped stages are absent.
    pub stages_executed: Vec<String>,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
    /// All collected failures (graceful mode accumulates, strict stops at
    /// the first).
    pub errors: Vec<StageFailure>,
    /// Result metadata (carries the schema-version stamp).
    #[serde(default)]
    pub metadata: ContextMap,
}

impl OrchestrationResult {
    /// Build a failed result from a single error.
    #[must_use]
    pub fn failure(stage: impl Into<String>, error: impl std::fmt::Display, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            response: None,
            stages_executed: Vec::new(),
            elapsed_ms,
            errors: vec![StageFailure {
                stage: stage.into(),
                error: error.to_string(),
            }],
            metadata: ContextMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator-owned records the engine reads
// ─────────────────────────────────────────────────────────────────────────────

/// The slice of a stored prompt the engine consumes.
///
/// Storage owns the full record; only these fields are read here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Prompt identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Raw prompt content the rules transform.
    pub content: String,
    /// Owning user.
    pub owner_id: String,
}

/// Experiment assignment for a session.
///
/// The variant transform is currently a pass-through hook; the assignment
/// is carried so downstream analytics can attribute responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    /// Experiment identifier.
    pub experiment_id: String,
    /// Assigned variant.
    pub variant: String,
    /// Variant parameters (opaque).
    #[serde(default)]
    pub params: ContextMap,
}
