//! Context processor — final content assembly for one request.
//!
//! Resolves the session's state, assembles the dynamic context (input,
//! session context, recent history, personalization selections, temporal
//! bucket, pipeline-accumulated context), applies adaptation rules and the
//! personalization/experiment transforms, updates the session state, and
//! schedules best-effort persistence.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Timelike, Utc};
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use attune_core::context::ContextMap;
use attune_core::{
    ContextRequest, ContextResponse, ContextSnapshot, ContextState, EngineError,
    ExperimentConfig, PersonalizedContext, Result,
};
use attune_settings::{ContextSettings, PersonalizationSettings};
use attune_store::ContextStorage;

use crate::adaptation::AdaptationRuleEngine;
use crate::state_store::ContextStateStore;

/// Coarse time-of-day bucket for the temporal context source.
#[must_use]
pub fn time_of_day_bucket(hour: u32) -> &'static str {
    match hour {
        0..6 => "late-night",
        6..12 => "morning",
        12..18 => "afternoon",
        _ => "evening",
    }
}

/// Final content assembly over the session state and storage collaborators.
pub struct ContextProcessor {
    storage: Arc<dyn ContextStorage>,
    state_store: Arc<ContextStateStore>,
    rule_engine: AdaptationRuleEngine,
    personalization: PersonalizationSettings,
    context_settings: ContextSettings,
}

impl ContextProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        storage: Arc<dyn ContextStorage>,
        state_store: Arc<ContextStateStore>,
        personalization: PersonalizationSettings,
        context_settings: ContextSettings,
    ) -> Self {
        Self {
            storage,
            state_store,
            rule_engine: AdaptationRuleEngine::new(),
            personalization,
            context_settings,
        }
    }

    /// Process one request against the final pipeline-accumulated context.
    ///
    /// Fails with `NotFound` when the prompt does not exist. Any failure
    /// is logged with the request context and propagated — the
    /// orchestrator reports it in the result.
    #[instrument(skip(self, request, pipeline_context), fields(prompt_id = %request.prompt_id, user_id = %request.user_id))]
    pub async fn process_context_request(
        &self,
        request: &ContextRequest,
        pipeline_context: &ContextMap,
    ) -> Result<ContextResponse> {
        match self.process_inner(request, pipeline_context).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(
                    prompt_id = %request.prompt_id,
                    user_id = %request.user_id,
                    session_id = request.session_id.as_deref().unwrap_or("<none>"),
                    error = %e,
                    "context processing failed"
                );
                Err(e)
            }
        }
    }

    async fn process_inner(
        &self,
        request: &ContextRequest,
        pipeline_context: &ContextMap,
    ) -> Result<ContextResponse> {
        let started = Instant::now();

        let prompt = self
            .storage
            .get_prompt(&request.prompt_id, &request.user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prompt", request.prompt_id.clone()))?;

        // The orchestrator fills a missing session id during preprocessing;
        // direct callers may still omit it.
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", request.user_id, Utc::now().timestamp_millis()));

        let mut state = self
            .state_store
            .get_or_create(&request.user_id, &session_id)
            .await?;

        let dynamic = self.assemble_dynamic_context(request, &state, pipeline_context);
        let context_sources: Vec<String> = dynamic.keys().cloned().collect();
        let dynamic_value = Value::Object(dynamic.clone());

        let outcome = self
            .rule_engine
            .apply(&prompt.content, &dynamic_value, &state.adaptation_rules);
        let content = apply_personalization(outcome.content, &state.personalized_data);
        let content = apply_experiment_variant(content, state.experiment.as_ref());

        self.update_state(&mut state, request, &content);

        if let Err(e) = self
            .storage
            .record_metric("context.requests", 1.0)
            .await
        {
            debug!(error = %e, "metric recording failed");
        }

        Ok(ContextResponse {
            content,
            context_used: dynamic,
            processing_time_ms: started.elapsed().as_millis() as u64,
            context_sources,
            rules_applied: outcome.rules_applied,
        })
    }

    /// Build the dynamic context the rules evaluate against.
    ///
    /// Sources, in order: raw input, session context, the most recent
    /// history snapshots (fixed recency window, no relevance scoring),
    /// threshold-filtered usage patterns and contextual memory, the
    /// temporal bucket, a task-context placeholder, and the context the
    /// pipeline stages accumulated.
    fn assemble_dynamic_context(
        &self,
        request: &ContextRequest,
        state: &ContextState,
        pipeline_context: &ContextMap,
    ) -> ContextMap {
        let p = &self.personalization;
        let now = Utc::now();

        let history: Vec<Value> = state
            .recent_history(self.context_settings.recent_window)
            .iter()
            .map(|s| {
                json!({
                    "timestamp": s.timestamp,
                    "triggerEvent": s.trigger_event,
                    "contextData": s.context_data,
                })
            })
            .collect();

        let patterns: Vec<Value> = state
            .personalized_data
            .relevant_patterns(p.pattern_min_effectiveness, p.pattern_min_frequency)
            .into_iter()
            .map(|pat| json!({"pattern": pat.pattern, "frequency": pat.frequency, "effectiveness": pat.effectiveness}))
            .collect();

        let memory: Vec<Value> = state
            .personalized_data
            .relevant_memory(p.memory_min_relevance, p.memory_cap)
            .into_iter()
            .map(|m| json!({"key": m.key, "value": m.value, "relevanceScore": m.relevance_score}))
            .collect();

        let mut dynamic = ContextMap::new();
        let _ = dynamic.insert("input".into(), json!(request.current_input));
        let _ = dynamic.insert("session".into(), Value::Object(state.current_context.clone()));
        let _ = dynamic.insert("history".into(), Value::Array(history));
        let _ = dynamic.insert("patterns".into(), Value::Array(patterns));
        let _ = dynamic.insert("memory".into(), Value::Array(memory));
        if let Some(prefs) = &request.preferences {
            let _ = dynamic.insert("preferences".into(), Value::Object(prefs.clone()));
        }
        let _ = dynamic.insert(
            "temporal".into(),
            json!({
                "timestamp": now,
                "timeOfDay": time_of_day_bucket(now.hour()),
            }),
        );
        // Task context is a placeholder until task tracking lands.
        let _ = dynamic.insert("task".into(), json!({}));
        let _ = dynamic.insert("pipeline".into(), Value::Object(pipeline_context.clone()));

        if let Some(required) = &request.required_context {
            let mut picked = ContextMap::new();
            for key in required {
                if let Some(v) = pipeline_context
                    .get(key)
                    .or_else(|| state.current_context.get(key))
                {
                    let _ = picked.insert(key.clone(), v.clone());
                }
            }
            let _ = dynamic.insert("required".into(), Value::Object(picked));
        }

        dynamic
    }

    /// Merge the interaction into the session state, record a snapshot,
    /// and kick off detached persistence.
    fn update_state(&self, state: &mut ContextState, request: &ContextRequest, output: &str) {
        let now = Utc::now();
        let _ = state
            .current_context
            .insert("lastInput".into(), json!(request.current_input));
        let _ = state
            .current_context
            .insert("lastOutput".into(), json!(output));
        let _ = state
            .current_context
            .insert("lastInteraction".into(), json!(now));

        let mut snapshot_data = ContextMap::new();
        let _ = snapshot_data.insert("input".into(), json!(request.current_input));
        let _ = snapshot_data.insert("output".into(), json!(output));
        let snapshot = ContextSnapshot::new("context_request", snapshot_data);

        let (max, trim_to) = self.state_store.history_limits();
        state.record_snapshot(snapshot.clone(), max, trim_to);

        self.state_store.put(state.clone());
        // Fire-and-forget: the response returns before this write lands.
        drop(self.state_store.persist_detached(state.clone(), snapshot));
    }
}

/// Preference/learning-data hook. Currently a pass-through; the seam
/// exists so profile-driven rewriting can land without touching callers.
fn apply_personalization(content: String, _profile: &PersonalizedContext) -> String {
    content
}

/// Experiment-variant transform. Currently a pass-through; the assignment
/// is carried for attribution only.
fn apply_experiment_variant(content: String, _experiment: Option<&ExperimentConfig>) -> String {
    content
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use attune_core::{ActionKind, AdaptationRule, Prompt, RuleAction};
    use attune_store::MemoryStorage;

    fn prompt(id: &str, content: &str) -> Prompt {
        Prompt {
            id: id.into(),
            name: "test".into(),
            content: content.into(),
            owner_id: "u1".into(),
        }
    }

    fn make_processor(memory: Arc<MemoryStorage>) -> ContextProcessor {
        let state_store = Arc::new(ContextStateStore::new(
            Arc::clone(&memory) as Arc<dyn ContextStorage>,
            ContextSettings::default(),
        ));
        ContextProcessor::new(
            memory,
            state_store,
            PersonalizationSettings::default(),
            ContextSettings::default(),
        )
    }

    fn request(prompt_id: &str) -> ContextRequest {
        let mut req = ContextRequest::new(prompt_id, "u1", "what is rust?");
        req.session_id = Some("s1".into());
        req
    }

    #[test]
    fn time_buckets() {
        assert_eq!(time_of_day_bucket(3), "late-night");
        assert_eq!(time_of_day_bucket(6), "morning");
        assert_eq!(time_of_day_bucket(11), "morning");
        assert_eq!(time_of_day_bucket(12), "afternoon");
        assert_eq!(time_of_day_bucket(17), "afternoon");
        assert_eq!(time_of_day_bucket(18), "evening");
        assert_eq!(time_of_day_bucket(23), "evening");
    }

    #[tokio::test]
    async fn missing_prompt_is_not_found() {
        let memory = Arc::new(MemoryStorage::new());
        let processor = make_processor(memory);

        let err = processor
            .process_context_request(&request("nope"), &ContextMap::new())
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::NotFound { kind: "prompt", .. });
    }

    #[tokio::test]
    async fn response_carries_sources_and_rule_count() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "Answer: {{topic}}"));
        memory.put_rules(
            "u1",
            vec![AdaptationRule::new(
                "r1",
                "fill topic",
                "always",
                RuleAction {
                    kind: ActionKind::Replace,
                    target: "topic".into(),
                    value: Some(json!("rust")),
                    template: None,
                },
                10,
            )],
        );
        let processor = make_processor(memory);

        let response = processor
            .process_context_request(&request("p1"), &ContextMap::new())
            .await
            .unwrap();

        assert_eq!(response.content, "Answer: rust");
        assert_eq!(response.rules_applied, 1);
        for source in ["input", "session", "history", "patterns", "memory", "temporal", "task", "pipeline"] {
            assert!(
                response.context_sources.iter().any(|s| s == source),
                "missing source {source}"
            );
        }
    }

    #[tokio::test]
    async fn state_is_updated_and_history_appended() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "content"));
        let processor = make_processor(Arc::clone(&memory));

        let _ = processor
            .process_context_request(&request("p1"), &ContextMap::new())
            .await
            .unwrap();

        let state = processor
            .state_store
            .get_or_create("u1", "s1")
            .await
            .unwrap();
        assert_eq!(state.current_context["lastInput"], json!("what is rust?"));
        assert_eq!(state.current_context["lastOutput"], json!("content"));
        assert!(state.current_context.get("lastInteraction").is_some());
        assert_eq!(state.context_history.len(), 1);
        assert_eq!(state.context_history[0].trigger_event, "context_request");
    }

    #[tokio::test]
    async fn persistence_failure_does_not_fail_the_response() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "content"));
        let processor = make_processor(Arc::clone(&memory));
        memory.set_fail_writes(true);

        let response = processor
            .process_context_request(&request("p1"), &ContextMap::new())
            .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn recent_history_window_is_five() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "content"));
        let processor = make_processor(Arc::clone(&memory));

        for _ in 0..8 {
            let _ = processor
                .process_context_request(&request("p1"), &ContextMap::new())
                .await
                .unwrap();
        }

        let response = processor
            .process_context_request(&request("p1"), &ContextMap::new())
            .await
            .unwrap();
        let history = response.context_used["history"].as_array().unwrap();
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn pipeline_context_flows_into_dynamic_context() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "content"));
        let processor = make_processor(memory);

        let mut pipeline = ContextMap::new();
        let _ = pipeline.insert("scopedContext".into(), json!({"tone": "formal"}));

        let response = processor
            .process_context_request(&request("p1"), &pipeline)
            .await
            .unwrap();
        assert_eq!(
            response.context_used["pipeline"]["scopedContext"]["tone"],
            json!("formal")
        );
    }

    #[tokio::test]
    async fn required_context_picks_named_keys() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(prompt("p1", "content"));
        let processor = make_processor(memory);

        let mut req = request("p1");
        req.required_context = Some(vec!["projectId".into(), "absent".into()]);
        let mut pipeline = ContextMap::new();
        let _ = pipeline.insert("projectId".into(), json!("proj-9"));

        let response = processor
            .process_context_request(&req, &pipeline)
            .await
            .unwrap();
        assert_eq!(response.context_used["required"]["projectId"], json!("proj-9"));
        assert!(response.context_used["required"].get("absent").is_none());
    }
}
