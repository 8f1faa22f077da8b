//! Pipeline configuration types.
//!
//! A pipeline is a named, immutable list of stages. Ordering contract:
//! stages run in ASCENDING priority order — LOWER priority runs first.
//! This is deliberately the opposite convention from adaptation rules
//! (higher-first); each is a distinct external contract and they must not
//! be unified.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use attune_core::Result;
use attune_core::context::ContextMap;

/// What the orchestrator hands each stage.
#[derive(Clone)]
pub struct StageInput {
    /// Snapshot of the in-flight accumulated context.
    pub context: ContextMap,
    /// Cancelled when the stage's deadline fires. The stage computation
    /// is abandoned (not forcibly stopped) on timeout; well-behaved
    /// stages observe this token and bail out early.
    pub cancel: CancellationToken,
}

/// A stage computation: consumes the input, produces a partial context to
/// shallow-merge back (stage wins on key collision).
pub type StageFn = Arc<dyn Fn(StageInput) -> BoxFuture<'static, Result<ContextMap>> + Send + Sync>;

/// Gate over the accumulated context; `false` skips the stage.
pub type StagePredicate = Arc<dyn Fn(&ContextMap) -> bool + Send + Sync>;

/// Pipeline-level policy for stage failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    /// Record the failure and continue with the remaining stages.
    Graceful,
    /// Abort on the first failure.
    Strict,
}

/// One unit of pipeline work.
#[derive(Clone)]
pub struct PipelineStage {
    /// Stage name (appears in `stages_executed` and error reports).
    pub name: String,
    /// Execution order — LOWER runs first.
    pub priority: i32,
    run: StageFn,
    predicate: Option<StagePredicate>,
    /// Per-stage deadline; the orchestrator default applies when unset.
    pub timeout: Option<Duration>,
}

impl PipelineStage {
    /// Create a stage from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, priority: i32, f: F) -> Self
    where
        F: Fn(StageInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ContextMap>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            run: Arc::new(move |input| Box::pin(f(input))),
            predicate: None,
            timeout: None,
        }
    }

    /// Gate the stage on a predicate over the accumulated context.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&ContextMap) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Set a per-stage deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the stage should run against the current context.
    #[must_use]
    pub fn should_run(&self, context: &ContextMap) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(context))
    }

    /// Start the stage computation.
    #[must_use]
    pub fn invoke(&self, input: StageInput) -> BoxFuture<'static, Result<ContextMap>> {
        (self.run)(input)
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("has_predicate", &self.predicate.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A named, immutable stage sequence with a fallback policy.
///
/// Registered once at startup and read-only thereafter.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Registry name.
    pub name: String,
    /// Stages in declaration order; execution order is by `priority`.
    pub stages: Vec<PipelineStage>,
    /// Failure policy.
    pub fallback: FallbackStrategy,
    /// Advisory overall budget. Logged at pipeline start; NOT enforced
    /// end-to-end (only per-stage deadlines are).
    pub total_timeout: Duration,
}

impl PipelineConfig {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, fallback: FallbackStrategy, total_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            fallback,
            total_timeout,
        }
    }

    /// Append a stage (builder style).
    #[must_use]
    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Stage execution order: indices sorted ascending by priority,
    /// ties preserving declaration order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.stages.len()).collect();
        order.sort_by_key(|&i| self.stages[i].priority);
        order
    }
}
