//! # attune-core
//!
//! Foundation types, errors, and utilities for the attune context engine.
//!
//! This crate provides the shared vocabulary that all other attune crates
//! depend on:
//!
//! - **Context state**: [`context::ContextState`] with bounded history,
//!   [`context::ContextSnapshot`], [`context::PersonalizedContext`]
//! - **Adaptation rules**: [`rules::AdaptationRule`] condition/action pairs
//!   with descending-priority ordering
//! - **Requests**: [`request::ContextRequest`], [`request::ContextResponse`],
//!   [`request::OrchestrationResult`]
//! - **Errors**: [`errors::EngineError`] hierarchy via `thiserror`
//! - **Text**: [`text::sanitize`] control-character stripping and blank
//!   detection
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other attune crates.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod request;
pub mod rules;
pub mod text;

pub use context::{
    ContextSnapshot, ContextState, ContextualMemoryEntry, PersonalizedContext, UsagePattern,
};
pub use errors::{EngineError, Result};
pub use request::{
    ContextRequest, ContextResponse, ExperimentConfig, OrchestrationResult, Prompt, StageFailure,
};
pub use rules::{ActionKind, AdaptationRule, RuleAction};
