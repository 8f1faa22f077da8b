//! # attune-runtime
//!
//! Pipeline orchestration, context processing, and adaptation rules.
//!
//! - **Orchestrator**: [`pipeline::PipelineOrchestrator`] — registry of named
//!   pipelines; preprocess → deadlined stages → processor → postprocess
//! - **Built-ins**: [`pipeline::builtin`] — the `default`, `fast`, and `deep`
//!   pipelines and their stages
//! - **Processor**: [`processor::ContextProcessor`] — dynamic context
//!   assembly, rule application, state update, detached persistence
//! - **Rule engine**: [`adaptation::AdaptationRuleEngine`] — priority-ordered
//!   condition/action evaluation with per-rule failure isolation
//! - **State store**: [`state_store::ContextStateStore`] — cached session
//!   state over storage with bounded history
//! - **Engine**: [`engine::ContextEngine`] — composition root wiring the
//!   above over one storage collaborator
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: attune-core, attune-settings, attune-store.
//! This is the crate an API layer embeds.

#![deny(unsafe_code)]

pub mod adaptation;
pub mod engine;
pub mod pipeline;
pub mod processor;
pub mod state_store;

// Re-export main public API
pub use adaptation::{AdaptationRuleEngine, RuleOutcome};
pub use engine::ContextEngine;
pub use pipeline::{
    FallbackStrategy, PipelineConfig, PipelineOrchestrator, PipelineStage, StageInput,
    register_builtin_pipelines,
};
pub use processor::ContextProcessor;
pub use state_store::ContextStateStore;
