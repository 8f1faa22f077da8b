//! Built-in stages and the pipelines shipped with the engine.
//!
//! Three pipelines are registered at startup:
//!
//! | name      | stages                                                        | fallback | budget |
//! |-----------|---------------------------------------------------------------|----------|--------|
//! | `default` | input-analysis, context-enrichment, personalization, validation | graceful | 15s    |
//! | `fast`    | context-enrichment                                            | graceful | 3s     |
//! | `deep`    | input-analysis, context-enrichment, personalization, validation | graceful | 30s    |
//!
//! Custom pipelines can be registered alongside these; the names are not
//! reserved beyond first registration winning until replaced.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;

use attune_core::context::ContextMap;
use attune_core::EngineError;
use attune_store::MultiLevelContextStore;

use crate::pipeline::config::{FallbackStrategy, PipelineConfig, PipelineStage, StageInput};
use crate::pipeline::orchestrator::PipelineOrchestrator;

/// Priorities of the built-in stages, spaced so custom stages can slot
/// between them.
pub mod priority {
    /// `input-analysis`.
    pub const INPUT_ANALYSIS: i32 = 10;
    /// `context-enrichment`.
    pub const CONTEXT_ENRICHMENT: i32 = 20;
    /// `personalization`.
    pub const PERSONALIZATION: i32 = 30;
    /// `validation`.
    pub const VALIDATION: i32 = 40;
}

/// Register the `default`, `fast`, and `deep` pipelines.
pub fn register_builtin_pipelines(
    orchestrator: &PipelineOrchestrator,
    scoped_store: Arc<MultiLevelContextStore>,
) {
    orchestrator.register_pipeline(
        PipelineConfig::new("default", FallbackStrategy::Graceful, Duration::from_secs(15))
            .with_stage(input_analysis_stage())
            .with_stage(context_enrichment_stage(Arc::clone(&scoped_store)))
            .with_stage(personalization_stage())
            .with_stage(validation_stage()),
    );
    orchestrator.register_pipeline(
        PipelineConfig::new("fast", FallbackStrategy::Graceful, Duration::from_secs(3))
            .with_stage(context_enrichment_stage(Arc::clone(&scoped_store))),
    );
    orchestrator.register_pipeline(
        PipelineConfig::new("deep", FallbackStrategy::Graceful, Duration::from_secs(30))
            .with_stage(input_analysis_stage())
            .with_stage(context_enrichment_stage(scoped_store))
            .with_stage(personalization_stage())
            .with_stage(validation_stage()),
    );
}

/// Shallow lexical features of the input, for downstream heuristics.
#[must_use]
pub fn input_analysis_stage() -> PipelineStage {
    PipelineStage::new("input-analysis", priority::INPUT_ANALYSIS, |input| async move {
        let text = str_key(&input.context, "input");
        let mut out = ContextMap::new();
        let _ = out.insert(
            "inputAnalysis".into(),
            json!({
                "charCount": text.chars().count(),
                "wordCount": text.split_whitespace().count(),
                "isQuestion": text.trim_end().ends_with('?'),
            }),
        );
        Ok(out)
    })
}

/// Fetch the merged session/user/global scoped context.
///
/// The fetch goes through the TTL cache; on a cold cache it reads
/// storage, so this stage checks for cancellation before and after the
/// round trip.
#[must_use]
pub fn context_enrichment_stage(store: Arc<MultiLevelContextStore>) -> PipelineStage {
    PipelineStage::new(
        "context-enrichment",
        priority::CONTEXT_ENRICHMENT,
        move |input: StageInput| {
            let store = Arc::clone(&store);
            async move {
                if input.cancel.is_cancelled() {
                    return Err(cancelled("context-enrichment"));
                }
                let session_id = str_key(&input.context, "sessionId");
                let user_id = str_key(&input.context, "userId");
                let user_id = (!user_id.is_empty()).then_some(user_id.as_str());

                let multi = store.get_multi_level(&session_id, user_id).await?;
                if input.cancel.is_cancelled() {
                    return Err(cancelled("context-enrichment"));
                }

                debug!(
                    session = %session_id,
                    keys = multi.merged.len(),
                    "scoped context fetched"
                );
                let mut out = ContextMap::new();
                let _ = out.insert("scopedContext".into(), Value::Object(multi.merged));
                Ok(out)
            }
        },
    )
}

/// Surface the request preferences for the processor. Skipped entirely
/// when the request carries none.
#[must_use]
pub fn personalization_stage() -> PipelineStage {
    PipelineStage::new(
        "personalization",
        priority::PERSONALIZATION,
        |input| async move {
            let prefs = input
                .context
                .get("preferences")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let mut out = ContextMap::new();
            let _ = out.insert("personalization".into(), json!({"preferences": prefs}));
            Ok(out)
        },
    )
    .with_predicate(|ctx| {
        ctx.get("preferences")
            .and_then(Value::as_object)
            .is_some_and(|m| !m.is_empty())
    })
}

/// Sanity-check the accumulated context before handing it to the
/// processor. Failing this stage under graceful fallback still lets the
/// processor run with whatever accumulated.
#[must_use]
pub fn validation_stage() -> PipelineStage {
    PipelineStage::new("validation", priority::VALIDATION, |input| async move {
        if str_key(&input.context, "input").is_empty() {
            return Err(EngineError::stage("validation", "accumulated context lost the input"));
        }
        let mut out = ContextMap::new();
        let _ = out.insert("validated".into(), json!(true));
        Ok(out)
    })
}

fn str_key(context: &ContextMap, key: &str) -> String {
    context
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn cancelled(stage: &str) -> EngineError {
    EngineError::stage(stage, "cancelled before completion")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
