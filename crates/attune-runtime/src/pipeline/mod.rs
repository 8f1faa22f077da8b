//! Staged pipeline execution.
//!
//! [`config`] holds the declarative pipeline/stage types, [`builtin`]
//! the stages and pipelines shipped with the engine, and
//! [`orchestrator`] the runner that drives a request through them.

pub mod builtin;
pub mod config;
pub mod orchestrator;

pub use builtin::register_builtin_pipelines;
pub use config::{
    FallbackStrategy, PipelineConfig, PipelineStage, StageFn, StageInput, StagePredicate,
};
pub use orchestrator::PipelineOrchestrator;
