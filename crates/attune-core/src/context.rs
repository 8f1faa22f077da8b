//! Per-session context state and personalization types.
//!
//! - [`ContextState`]: one record per `(user, session)` pair, with a bounded
//!   history of [`ContextSnapshot`]s
//! - [`PersonalizedContext`]: preferences, learning data, usage patterns and
//!   contextual memory with deterministic, threshold-based selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::ExperimentConfig;
use crate::rules::AdaptationRule;

/// Free-form key/value context map (latest-write-wins).
pub type ContextMap = serde_json::Map<String, Value>;

/// History length at which a trim is triggered.
pub const HISTORY_MAX_DEFAULT: usize = 100;
/// Number of most-recent entries kept after a trim.
pub const HISTORY_TRIM_TO_DEFAULT: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Context state
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable history entry recorded after each processed request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// What caused the snapshot (e.g. `"context_request"`).
    pub trigger_event: String,
    /// Context captured at snapshot time.
    pub context_data: ContextMap,
    /// Optional effectiveness score attached later by feedback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effectiveness: Option<f64>,
    /// Arbitrary extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ContextMap>,
}

impl ContextSnapshot {
    /// Create a snapshot with the current wall-clock timestamp.
    #[must_use]
    pub fn new(trigger_event: impl Into<String>, context_data: ContextMap) -> Self {
        Self {
            timestamp: Utc::now(),
            trigger_event: trigger_event.into(),
            context_data,
            effectiveness: None,
            metadata: None,
        }
    }
}

/// Mutable per-session context record.
///
/// One exists per `(user_id, session_id)`. Created on first request for a
/// session (loaded from storage when the session id resolves, fresh
/// otherwise), mutated after each processed request, and persisted
/// asynchronously — in-memory and durable state may diverge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    /// Session this state belongs to.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Current free-form context (latest-write-wins).
    #[serde(default)]
    pub current_context: ContextMap,
    /// Ordered history, append-only, newest-last.
    ///
    /// INVARIANT: length never exceeds the configured cap after
    /// [`record_snapshot`](Self::record_snapshot); a trim keeps exactly the
    /// most recent entries (lossy, irreversible).
    #[serde(default)]
    pub context_history: Vec<ContextSnapshot>,
    /// Owned copy of the user's rules, loaded once at session creation.
    /// Not live-reloaded mid-session.
    #[serde(default)]
    pub adaptation_rules: Vec<AdaptationRule>,
    /// Personalization data for selection-based context assembly.
    #[serde(default)]
    pub personalized_data: PersonalizedContext,
    /// Active experiment assignment, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentConfig>,
}

impl ContextState {
    /// Create a fresh state for a session.
    #[must_use]
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            current_context: ContextMap::new(),
            context_history: Vec::new(),
            adaptation_rules: Vec::new(),
            personalized_data: PersonalizedContext::default(),
            experiment: None,
        }
    }

    /// Append a snapshot and enforce the history cap.
    ///
    /// When the history grows past `max`, only the most recent `trim_to`
    /// entries survive. Older entries are discarded permanently.
    pub fn record_snapshot(&mut self, snapshot: ContextSnapshot, max: usize, trim_to: usize) {
        self.context_history.push(snapshot);
        if self.context_history.len() > max {
            let excess = self.context_history.len() - trim_to.min(max);
            drop(self.context_history.drain(..excess));
        }
    }

    /// The `n` most recent snapshots, oldest-first.
    #[must_use]
    pub fn recent_history(&self, n: usize) -> &[ContextSnapshot] {
        let len = self.context_history.len();
        &self.context_history[len.saturating_sub(n)..]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Personalization
// ─────────────────────────────────────────────────────────────────────────────

/// An observed usage pattern with effectiveness tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePattern {
    /// Pattern label.
    pub pattern: String,
    /// Times this pattern has been observed.
    pub frequency: u32,
    /// Effectiveness score in `[0, 1]`.
    pub effectiveness: f64,
    /// Last time the pattern was used.
    pub last_used: DateTime<Utc>,
    /// Context the pattern applies in.
    #[serde(default)]
    pub context: ContextMap,
}

/// A remembered key/value fact with a relevance score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextualMemoryEntry {
    /// Memory key.
    pub key: String,
    /// Stored value.
    pub value: Value,
    /// Relevance in `[0, 1]`; drives selection.
    pub relevance_score: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last access time.
    pub last_accessed: DateTime<Utc>,
    /// Access count.
    pub access_count: u64,
}

/// Per-user personalization data consulted during context assembly.
///
/// Selection is deterministic and stateless — simple threshold filters,
/// not learned ranking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalizedContext {
    /// User preference map.
    pub preferences: ContextMap,
    /// Accumulated learning data (opaque to the engine).
    pub learning_data: ContextMap,
    /// Observed usage patterns.
    pub usage_patterns: Vec<UsagePattern>,
    /// Remembered contextual facts.
    pub contextual_memory: Vec<ContextualMemoryEntry>,
}

impl PersonalizedContext {
    /// Patterns worth surfacing: effectiveness above `min_effectiveness`
    /// AND frequency above `min_frequency`.
    #[must_use]
    pub fn relevant_patterns(
        &self,
        min_effectiveness: f64,
        min_frequency: u32,
    ) -> Vec<&UsagePattern> {
        self.usage_patterns
            .iter()
            .filter(|p| p.effectiveness > min_effectiveness && p.frequency > min_frequency)
            .collect()
    }

    /// Memory entries above `min_relevance`, sorted by relevance
    /// descending, capped at `cap`.
    #[must_use]
    pub fn relevant_memory(&self, min_relevance: f64, cap: usize) -> Vec<&ContextualMemoryEntry> {
        let mut selected: Vec<&ContextualMemoryEntry> = self
            .contextual_memory
            .iter()
            .filter(|m| m.relevance_score > min_relevance)
            .collect();
        selected.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selected.truncate(cap);
        selected
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
