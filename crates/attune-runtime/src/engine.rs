//! Composition root — wires storage, settings, and the runtime services
//! into one engine handle.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use attune_core::{ContextRequest, OrchestrationResult};
use attune_settings::AttuneSettings;
use attune_store::{ContextStorage, MultiLevelContextStore};

use crate::pipeline::builtin::register_builtin_pipelines;
use crate::pipeline::orchestrator::PipelineOrchestrator;
use crate::processor::ContextProcessor;
use crate::state_store::ContextStateStore;

/// The assembled context engine.
///
/// Owns the orchestrator (with the built-in pipelines registered), the
/// session state store, and the multi-level scoped context store, all
/// over one shared [`ContextStorage`] collaborator.
pub struct ContextEngine {
    orchestrator: Arc<PipelineOrchestrator>,
    scoped: Arc<MultiLevelContextStore>,
    state_store: Arc<ContextStateStore>,
}

impl ContextEngine {
    /// Wire an engine from storage and settings.
    #[must_use]
    pub fn new(storage: Arc<dyn ContextStorage>, settings: AttuneSettings) -> Self {
        let scoped = Arc::new(MultiLevelContextStore::new(
            Arc::clone(&storage),
            Duration::from_secs(settings.context.cache_ttl_secs),
        ));
        let state_store = Arc::new(ContextStateStore::new(
            Arc::clone(&storage),
            settings.context.clone(),
        ));
        let processor = Arc::new(ContextProcessor::new(
            storage,
            Arc::clone(&state_store),
            settings.personalization.clone(),
            settings.context.clone(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            processor,
            settings.orchestrator.clone(),
        ));
        register_builtin_pipelines(&orchestrator, Arc::clone(&scoped));

        info!(
            pipelines = ?orchestrator.pipeline_names(),
            cache_ttl_secs = settings.context.cache_ttl_secs,
            "context engine assembled"
        );
        Self {
            orchestrator,
            scoped,
            state_store,
        }
    }

    /// Run a request through a named pipeline.
    pub async fn orchestrate(
        &self,
        request: ContextRequest,
        pipeline_name: &str,
    ) -> OrchestrationResult {
        self.orchestrator.orchestrate(request, pipeline_name).await
    }

    /// The pipeline orchestrator, for registering custom pipelines.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    /// The multi-level scoped context store.
    #[must_use]
    pub fn scoped_context(&self) -> &Arc<MultiLevelContextStore> {
        &self.scoped
    }

    /// The session state store.
    #[must_use]
    pub fn state_store(&self) -> &Arc<ContextStateStore> {
        &self.state_store
    }
}
