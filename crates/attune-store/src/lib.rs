//! # attune-store
//!
//! Storage seam and multi-level scoped context for the attune engine.
//!
//! - **Storage**: [`storage::ContextStorage`] — the async trait the engine
//!   consumes for prompts, sessions, rules, profiles, and scoped records.
//!   [`storage::MemoryStorage`] is the in-process reference implementation.
//! - **Multi-level context**: [`multi_level::MultiLevelContextStore`] —
//!   three scoped records (session, user, global), each independently
//!   cached with a TTL, plus merge strategies and precedence folding.
//!
//! ## Crate Position
//!
//! Depends on: attune-core.
//! Depended on by: attune-runtime.

#![deny(unsafe_code)]

pub mod multi_level;
pub mod storage;

pub use multi_level::{
    ContextLevel, MergeStrategy, MultiLevelContext, MultiLevelContextStore, UnifiedContextState,
    UpdateOptions, merge_context,
};
pub use storage::{ContextStorage, MemoryStorage};
