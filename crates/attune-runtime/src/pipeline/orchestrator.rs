//! Pipeline orchestrator — staged context enrichment for one request.
//!
//! `orchestrate` runs a named pipeline: preprocess → ordered stages
//! (predicate-gated, individually deadlined) → context processor →
//! postprocess. Stage failures are governed by the pipeline's fallback
//! strategy; the processor runs unconditionally on the graceful path.
//!
//! The orchestrator is an explicitly constructed service object owned by
//! the composition root — there is no ambient singleton.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use attune_core::context::ContextMap;
use attune_core::{ContextRequest, EngineError, OrchestrationResult, Result, StageFailure, text};
use attune_settings::OrchestratorSettings;

use crate::pipeline::config::{FallbackStrategy, PipelineConfig, StageInput};
use crate::processor::ContextProcessor;

/// Staged request orchestrator with a pipeline registry.
pub struct PipelineOrchestrator {
    pipelines: RwLock<HashMap<String, Arc<PipelineConfig>>>,
    processor: Arc<ContextProcessor>,
    settings: OrchestratorSettings,
}

impl PipelineOrchestrator {
    /// Create an orchestrator with an empty registry.
    #[must_use]
    pub fn new(processor: Arc<ContextProcessor>, settings: OrchestratorSettings) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            processor,
            settings,
        }
    }

    /// Register a pipeline. Intended for startup code; configs are
    /// read-only once requests start flowing.
    pub fn register_pipeline(&self, config: PipelineConfig) {
        let name = config.name.clone();
        let replaced = self.pipelines.write().insert(name.clone(), Arc::new(config));
        if replaced.is_some() {
            warn!(pipeline = %name, "pipeline re-registered, previous config replaced");
        }
    }

    /// Look up a registered pipeline.
    #[must_use]
    pub fn get_pipeline(&self, name: &str) -> Option<Arc<PipelineConfig>> {
        self.pipelines.read().get(name).cloned()
    }

    /// Names of all registered pipelines.
    #[must_use]
    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.read().keys().cloned().collect()
    }

    /// Run one request through a named pipeline.
    ///
    /// Never returns `Err` — every failure mode is reported inside the
    /// [`OrchestrationResult`] so the API layer has one shape to map.
    #[instrument(skip(self, request), fields(pipeline = %pipeline_name, user_id = %request.user_id))]
    pub async fn orchestrate(
        &self,
        request: ContextRequest,
        pipeline_name: &str,
    ) -> OrchestrationResult {
        let started = Instant::now();
        let run_id = Uuid::now_v7();
        counter!("pipeline_runs_total").increment(1);

        let Some(config) = self.get_pipeline(pipeline_name) else {
            warn!(%run_id, pipeline = %pipeline_name, "unknown pipeline");
            return OrchestrationResult::failure(
                "orchestrate",
                EngineError::not_found("pipeline", pipeline_name),
                elapsed_ms(started),
            );
        };

        let request = match preprocess(request) {
            Ok(req) => req,
            Err(e) => {
                debug!(%run_id, error = %e, "preprocessing rejected request");
                return OrchestrationResult::failure("preprocess", e, elapsed_ms(started));
            }
        };

        info!(
            %run_id,
            pipeline = %config.name,
            stages = config.stages.len(),
            fallback = ?config.fallback,
            total_timeout_ms = config.total_timeout.as_millis() as u64,
            "pipeline started"
        );

        let mut context = seed_context(&request);
        let mut stages_executed: Vec<String> = Vec::new();
        let mut errors: Vec<StageFailure> = Vec::new();

        for index in config.execution_order() {
            let stage = &config.stages[index];

            if !stage.should_run(&context) {
                debug!(%run_id, stage = %stage.name, "stage skipped by predicate");
                continue;
            }

            match self.run_stage(stage, &context).await {
                Ok(partial) => {
                    // Shallow merge, stage wins on key collision.
                    for (key, value) in partial {
                        let _ = context.insert(key, value);
                    }
                    stages_executed.push(stage.name.clone());
                }
                Err(e) => {
                    counter!("pipeline_stage_failures_total").increment(1);
                    warn!(%run_id, stage = %stage.name, error = %e, "stage failed");
                    errors.push(StageFailure {
                        stage: stage.name.clone(),
                        error: e.to_string(),
                    });
                    if config.fallback == FallbackStrategy::Strict {
                        info!(%run_id, "strict fallback, aborting pipeline");
                        return OrchestrationResult {
                            success: false,
                            response: None,
                            stages_executed,
                            elapsed_ms: elapsed_ms(started),
                            errors,
                            metadata: self.result_metadata(&config.name),
                        };
                    }
                }
            }
        }

        // The processor runs unconditionally on the graceful path, even
        // when some stages failed above.
        let response = match self.processor.process_context_request(&request, &context).await {
            Ok(resp) => resp,
            Err(e) => {
                errors.push(StageFailure {
                    stage: "context-processor".into(),
                    error: e.to_string(),
                });
                return OrchestrationResult {
                    success: false,
                    response: None,
                    stages_executed,
                    elapsed_ms: elapsed_ms(started),
                    errors,
                    metadata: self.result_metadata(&config.name),
                };
            }
        };

        let response = match postprocess(response) {
            Ok(resp) => resp,
            Err(e) => {
                errors.push(StageFailure {
                    stage: "postprocess".into(),
                    error: e.to_string(),
                });
                return OrchestrationResult {
                    success: false,
                    response: None,
                    stages_executed,
                    elapsed_ms: elapsed_ms(started),
                    errors,
                    metadata: self.result_metadata(&config.name),
                };
            }
        };

        let elapsed = elapsed_ms(started);
        histogram!("pipeline_duration_ms").record(elapsed as f64);
        info!(
            %run_id,
            pipeline = %config.name,
            stages_executed = stages_executed.len(),
            errors = errors.len(),
            elapsed_ms = elapsed,
            "pipeline completed"
        );

        OrchestrationResult {
            success: true,
            response: Some(response),
            stages_executed,
            elapsed_ms: elapsed,
            errors,
            metadata: self.result_metadata(&config.name),
        }
    }

    /// Run one stage under its deadline.
    ///
    /// The stage is spawned so a deadline miss can abandon it: on timeout
    /// the cancellation token is fired (well-behaved stages stop early)
    /// but the computation is NOT forcibly stopped — its side effects may
    /// still land after the timeout is reported. Stage functions should
    /// be idempotent or side-effect-light for this reason.
    async fn run_stage(
        &self,
        stage: &crate::pipeline::config::PipelineStage,
        context: &ContextMap,
    ) -> Result<ContextMap> {
        let deadline = stage
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.default_stage_timeout_ms));
        let cancel = CancellationToken::new();
        let mut handle = tokio::spawn(stage.invoke(StageInput {
            context: context.clone(),
            cancel: cancel.clone(),
        }));

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(join_err) => Err(EngineError::stage(&stage.name, join_err)),
            },
            () = tokio::time::sleep(deadline) => {
                cancel.cancel();
                Err(EngineError::StageTimeout {
                    stage: stage.name.clone(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    fn result_metadata(&self, pipeline: &str) -> ContextMap {
        let mut metadata = ContextMap::new();
        let _ = metadata.insert(
            "schemaVersion".into(),
            json!(self.settings.schema_version),
        );
        let _ = metadata.insert("pipeline".into(), json!(pipeline));
        metadata
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Pre/post processing
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize and validate an incoming request.
///
/// Sanitizes the input first so control-only input reads as empty, fills
/// a missing session id deterministically from the user id and current
/// time, and defaults preferences to an empty map.
fn preprocess(mut request: ContextRequest) -> Result<ContextRequest> {
    let sanitized = text::sanitize(&request.current_input);
    if text::is_blank(&sanitized) {
        return Err(EngineError::Validation(
            "input is empty after sanitization".into(),
        ));
    }
    request.current_input = sanitized;

    let needs_session = request
        .session_id
        .as_deref()
        .is_none_or(|s| s.trim().is_empty());
    if needs_session {
        request.session_id = Some(format!(
            "{}_{}",
            request.user_id,
            Utc::now().timestamp_millis()
        ));
    }
    if request.preferences.is_none() {
        request.preferences = Some(ContextMap::new());
    }
    Ok(request)
}

/// Sanitize the final output and reject it if empty.
fn postprocess(
    mut response: attune_core::ContextResponse,
) -> Result<attune_core::ContextResponse> {
    let sanitized = text::sanitize(&response.content);
    if text::is_blank(&sanitized) {
        return Err(EngineError::Validation(
            "final output is empty after sanitization".into(),
        ));
    }
    response.content = sanitized;
    Ok(response)
}

/// Seed the in-flight context from the preprocessed request.
fn seed_context(request: &ContextRequest) -> ContextMap {
    let mut context = ContextMap::new();
    let _ = context.insert("input".into(), json!(request.current_input));
    let _ = context.insert("promptId".into(), json!(request.prompt_id));
    let _ = context.insert("userId".into(), json!(request.user_id));
    if let Some(session_id) = &request.session_id {
        let _ = context.insert("sessionId".into(), json!(session_id));
    }
    let _ = context.insert(
        "preferences".into(),
        Value::Object(request.preferences.clone().unwrap_or_default()),
    );
    context
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::PipelineStage;
    use crate::processor::ContextProcessor;
    use crate::state_store::ContextStateStore;
    use attune_core::Prompt;
    use attune_settings::{ContextSettings, PersonalizationSettings};
    use attune_store::{ContextStorage, MemoryStorage};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn make_orchestrator() -> (Arc<MemoryStorage>, PipelineOrchestrator) {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_prompt(Prompt {
            id: "p1".into(),
            name: "test".into(),
            content: "prompt content".into(),
            owner_id: "u1".into(),
        });
        let state_store = Arc::new(ContextStateStore::new(
            Arc::clone(&memory) as Arc<dyn ContextStorage>,
            ContextSettings::default(),
        ));
        let processor = Arc::new(ContextProcessor::new(
            Arc::clone(&memory) as Arc<dyn ContextStorage>,
            state_store,
            PersonalizationSettings::default(),
            ContextSettings::default(),
        ));
        let orchestrator =
            PipelineOrchestrator::new(processor, OrchestratorSettings::default());
        (memory, orchestrator)
    }

    fn request() -> ContextRequest {
        let mut req = ContextRequest::new("p1", "u1", "hello world");
        req.session_id = Some("s1".into());
        req
    }

    fn marker_stage(name: &str, priority: i32) -> PipelineStage {
        let key = name.to_string();
        PipelineStage::new(name, priority, move |_input| {
            let key = key.clone();
            async move {
                let mut out = ContextMap::new();
                let _ = out.insert(key, json!(true));
                Ok(out)
            }
        })
    }

    fn failing_stage(name: &str, priority: i32) -> PipelineStage {
        let stage_name = name.to_string();
        PipelineStage::new(name, priority, move |_input| {
            let stage_name = stage_name.clone();
            async move { Err(EngineError::stage(stage_name, "boom")) }
        })
    }

    // ── Registry ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_pipeline_fails_fast() {
        let (_memory, orch) = make_orchestrator();
        let result = orch.orchestrate(request(), "nope").await;
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("pipeline not found"));
        assert!(result.stages_executed.is_empty());
    }

    #[tokio::test]
    async fn registered_pipeline_is_found() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(PipelineConfig::new(
            "empty",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));
        assert!(orch.get_pipeline("empty").is_some());
        assert_eq!(orch.pipeline_names(), ["empty"]);
    }

    // ── Stage ordering ───────────────────────────────────────────────────

    #[tokio::test]
    async fn stages_run_in_ascending_priority_order() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("ordered", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(marker_stage("three", 3))
                .with_stage(marker_stage("one", 1))
                .with_stage(marker_stage("two", 2)),
        );

        let result = orch.orchestrate(request(), "ordered").await;
        assert!(result.success);
        assert_eq!(result.stages_executed, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn skipped_stage_is_not_executed_or_an_error() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("gated", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(marker_stage("always", 1))
                .with_stage(
                    marker_stage("never", 2).with_predicate(|ctx| ctx.contains_key("no-such-key")),
                ),
        );

        let result = orch.orchestrate(request(), "gated").await;
        assert!(result.success);
        assert_eq!(result.stages_executed, ["always"]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn predicate_sees_accumulated_context() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("chained", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(marker_stage("first", 1))
                .with_stage(
                    // Gated on the key the first stage wrote
                    marker_stage("second", 2).with_predicate(|ctx| ctx.contains_key("first")),
                ),
        );

        let result = orch.orchestrate(request(), "chained").await;
        assert_eq!(result.stages_executed, ["first", "second"]);
    }

    // ── Fallback policies ────────────────────────────────────────────────

    #[tokio::test]
    async fn graceful_failure_still_reaches_the_processor() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("graceful", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(failing_stage("broken", 1))
                .with_stage(marker_stage("after", 2)),
        );

        let result = orch.orchestrate(request(), "graceful").await;
        assert!(result.success);
        assert!(result.response.is_some());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, "broken");
        assert_eq!(result.stages_executed, ["after"]);
    }

    #[tokio::test]
    async fn strict_failure_aborts_without_later_stages() {
        let (_memory, orch) = make_orchestrator();
        let later_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&later_ran);

        orch.register_pipeline(
            PipelineConfig::new("strict", FallbackStrategy::Strict, Duration::from_secs(5))
                .with_stage(failing_stage("broken", 1))
                .with_stage(PipelineStage::new("later", 2, move |_input| {
                    let flag = Arc::clone(&flag);
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(ContextMap::new())
                    }
                })),
        );

        let result = orch.orchestrate(request(), "strict").await;
        assert!(!result.success);
        assert!(result.response.is_none());
        assert_eq!(result.errors.len(), 1);
        assert!(!later_ran.load(Ordering::SeqCst));
    }

    // ── Timeouts ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn slow_stage_times_out_gracefully() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("slow", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(
                    PipelineStage::new("sleepy", 1, |_input| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(ContextMap::new())
                    })
                    .with_timeout(Duration::from_millis(50)),
                ),
        );

        let result = orch.orchestrate(request(), "slow").await;
        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].error.contains("timed out after 50ms"));
        assert!(result.stages_executed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_stage_observes_cancellation() {
        let (_memory, orch) = make_orchestrator();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);

        orch.register_pipeline(
            PipelineConfig::new("cancel", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(
                    PipelineStage::new("cooperative", 1, move |input| {
                        let flag = Arc::clone(&flag);
                        async move {
                            tokio::select! {
                                () = input.cancel.cancelled() => {
                                    flag.store(true, Ordering::SeqCst);
                                    Err(EngineError::stage("cooperative", "cancelled"))
                                }
                                () = tokio::time::sleep(Duration::from_secs(60)) => {
                                    Ok(ContextMap::new())
                                }
                            }
                        }
                    })
                    .with_timeout(Duration::from_millis(10)),
                ),
        );

        let result = orch.orchestrate(request(), "cancel").await;
        assert!(!result.errors.is_empty());

        // Let the abandoned task run to observe the cancellation signal.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    // ── Preprocessing ────────────────────────────────────────────────────

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(PipelineConfig::new(
            "any",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));

        let mut req = request();
        req.current_input = "   \t ".into();
        let result = orch.orchestrate(req, "any").await;
        assert!(!result.success);
        assert_eq!(result.errors[0].stage, "preprocess");
    }

    #[tokio::test]
    async fn control_only_input_is_rejected_after_sanitization() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(PipelineConfig::new(
            "any",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));

        let mut req = request();
        req.current_input = "\0\u{01}\u{02}".into();
        let result = orch.orchestrate(req, "any").await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn input_is_sanitized_before_stages() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("echo", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(PipelineStage::new("echo", 1, |input| async move {
                    let mut out = ContextMap::new();
                    let _ = out.insert("seenInput".into(), input.context["input"].clone());
                    Ok(out)
                })),
        );

        let mut req = request();
        req.current_input = "he\0llo\u{9C} world".into();
        let result = orch.orchestrate(req, "echo").await;
        let response = result.response.unwrap();
        assert_eq!(
            response.context_used["pipeline"]["seenInput"],
            json!("hello world")
        );
    }

    #[tokio::test]
    async fn missing_session_id_is_filled_from_user_and_time() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("echo", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(PipelineStage::new("echo", 1, |input| async move {
                    let mut out = ContextMap::new();
                    let _ = out.insert("seenSession".into(), input.context["sessionId"].clone());
                    Ok(out)
                })),
        );

        let mut req = request();
        req.session_id = None;
        let result = orch.orchestrate(req, "echo").await;
        let response = result.response.unwrap();
        let session = response.context_used["pipeline"]["seenSession"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(session.starts_with("u1_"), "got {session}");
    }

    #[tokio::test]
    async fn preferences_default_to_empty() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("echo", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(PipelineStage::new("echo", 1, |input| async move {
                    let mut out = ContextMap::new();
                    let _ = out.insert("seenPrefs".into(), input.context["preferences"].clone());
                    Ok(out)
                })),
        );

        let result = orch.orchestrate(request(), "echo").await;
        let response = result.response.unwrap();
        assert_eq!(response.context_used["pipeline"]["seenPrefs"], json!({}));
    }

    // ── Postprocessing ───────────────────────────────────────────────────

    #[tokio::test]
    async fn output_is_sanitized_and_schema_stamped() {
        let (memory, orch) = make_orchestrator();
        memory.put_prompt(Prompt {
            id: "dirty".into(),
            name: "dirty".into(),
            content: "out\0put".into(),
            owner_id: "u1".into(),
        });
        orch.register_pipeline(PipelineConfig::new(
            "plain",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));

        let mut req = request();
        req.prompt_id = "dirty".into();
        let result = orch.orchestrate(req, "plain").await;
        assert!(result.success);
        assert_eq!(result.response.unwrap().content, "output");
        assert_eq!(result.metadata["schemaVersion"], json!("1.0"));
        assert_eq!(result.metadata["pipeline"], json!("plain"));
    }

    #[tokio::test]
    async fn control_only_output_is_a_postprocess_error() {
        let (memory, orch) = make_orchestrator();
        memory.put_prompt(Prompt {
            id: "empty".into(),
            name: "empty".into(),
            content: "\0\u{07}".into(),
            owner_id: "u1".into(),
        });
        orch.register_pipeline(PipelineConfig::new(
            "plain",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));

        let mut req = request();
        req.prompt_id = "empty".into();
        let result = orch.orchestrate(req, "plain").await;
        assert!(!result.success);
        assert_eq!(result.errors[0].stage, "postprocess");
    }

    // ── Processor integration ────────────────────────────────────────────

    #[tokio::test]
    async fn missing_prompt_surfaces_as_processor_error() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(PipelineConfig::new(
            "plain",
            FallbackStrategy::Graceful,
            Duration::from_secs(1),
        ));

        let mut req = request();
        req.prompt_id = "ghost".into();
        let result = orch.orchestrate(req, "plain").await;
        assert!(!result.success);
        assert_eq!(result.errors[0].stage, "context-processor");
        assert!(result.errors[0].error.contains("prompt not found"));
    }

    #[tokio::test]
    async fn stage_context_wins_on_key_collision() {
        let (_memory, orch) = make_orchestrator();
        orch.register_pipeline(
            PipelineConfig::new("collide", FallbackStrategy::Graceful, Duration::from_secs(5))
                .with_stage(PipelineStage::new("first", 1, |_input| async {
                    let mut out = ContextMap::new();
                    let _ = out.insert("shared".into(), json!("from-first"));
                    Ok(out)
                }))
                .with_stage(PipelineStage::new("second", 2, |_input| async {
                    let mut out = ContextMap::new();
                    let _ = out.insert("shared".into(), json!("from-second"));
                    Ok(out)
                })),
        );

        let result = orch.orchestrate(request(), "collide").await;
        let response = result.response.unwrap();
        assert_eq!(
            response.context_used["pipeline"]["shared"],
            json!("from-second")
        );
    }
}
