//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON
//! wire format used by the rest of the platform. Each type implements
//! [`Default`] with production default values and `#[serde(default)]`, so
//! partial JSON files are valid — missing fields get their defaults.

use serde::{Deserialize, Serialize};

/// Root settings for the attune context engine.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "orchestrator": { "defaultStageTimeoutMs": 5000 },
///   "context": { "cacheTtlSecs": 300 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttuneSettings {
    /// Settings schema version.
    pub version: String,
    /// Pipeline orchestration settings.
    pub orchestrator: OrchestratorSettings,
    /// Context state and cache settings.
    pub context: ContextSettings,
    /// Personalization selection thresholds.
    pub personalization: PersonalizationSettings,
}

impl Default for AttuneSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            orchestrator: OrchestratorSettings::default(),
            context: ContextSettings::default(),
            personalization: PersonalizationSettings::default(),
        }
    }
}

impl AttuneSettings {
    /// Clamp ratio fields and correct invalid invariants.
    ///
    /// Called automatically during loading. Out-of-range values are
    /// corrected with a warning rather than rejected, so users get fixed
    /// behavior instead of a confusing startup error.
    pub fn validate(&mut self) {
        fn clamp_ratio(val: &mut f64, name: &str) {
            if *val < 0.0 || *val > 1.0 {
                let clamped = val.clamp(0.0, 1.0);
                tracing::warn!("{name} out of range ({val}), clamped to {clamped}");
                *val = clamped;
            }
        }

        let p = &mut self.personalization;
        clamp_ratio(&mut p.pattern_min_effectiveness, "pattern_min_effectiveness");
        clamp_ratio(&mut p.memory_min_relevance, "memory_min_relevance");

        let c = &mut self.context;
        if c.history_trim_to > c.history_max {
            tracing::warn!(
                history_trim_to = c.history_trim_to,
                history_max = c.history_max,
                "history_trim_to exceeds history_max, clamping"
            );
            c.history_trim_to = c.history_max;
        }
        if c.history_max == 0 {
            tracing::warn!("history_max of 0 is invalid, using 1");
            c.history_max = 1;
        }
    }
}

/// Pipeline orchestration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Per-stage deadline when a stage does not set its own, in ms.
    pub default_stage_timeout_ms: u64,
    /// Schema-version marker stamped into every result's metadata.
    pub schema_version: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_stage_timeout_ms: 5_000,
            schema_version: "1.0".to_string(),
        }
    }
}

/// Context state and cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// History length that triggers a trim.
    pub history_max: usize,
    /// Entries kept after a trim (the most recent ones).
    pub history_trim_to: usize,
    /// Snapshots included in the dynamic context (fixed recency window).
    pub recent_window: usize,
    /// Scoped-context cache TTL in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            history_max: 100,
            history_trim_to: 50,
            recent_window: 5,
            cache_ttl_secs: 300,
        }
    }
}

/// Personalization selection thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalizationSettings {
    /// Minimum usage-pattern effectiveness (strict greater-than).
    pub pattern_min_effectiveness: f64,
    /// Minimum usage-pattern frequency (strict greater-than).
    pub pattern_min_frequency: u32,
    /// Minimum contextual-memory relevance (strict greater-than).
    pub memory_min_relevance: f64,
    /// Maximum contextual-memory entries surfaced.
    pub memory_cap: usize,
}

impl Default for PersonalizationSettings {
    fn default() -> Self {
        Self {
            pattern_min_effectiveness: 0.7,
            pattern_min_frequency: 3,
            memory_min_relevance: 0.6,
            memory_cap: 5,
        }
    }
}
