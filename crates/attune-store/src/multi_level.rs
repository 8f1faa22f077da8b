//! Multi-level scoped context with TTL caching and merge strategies.
//!
//! Three context scopes exist per logical key: `session`, `user`, and
//! `global`. Each is cached independently; a cache entry is honored only
//! while fresh (see [`MultiLevelContextStore::get`]). Precedence when
//! folding levels together is **global < user < session** — the session
//! record wins on key collisions.
//!
//! The cache is unbounded and TTL is checked on read, not swept
//! proactively; long-running deployments with many sessions should clear
//! stale scopes explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use attune_core::context::ContextMap;
use attune_core::Result;

use crate::storage::ContextStorage;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Context scope level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    /// Bound to one session.
    Session,
    /// Shared across a user's sessions.
    User,
    /// Process-wide singleton scope (no user).
    Global,
}

impl ContextLevel {
    /// Stable string form (matches the serialized representation).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::User => "user",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How two context maps are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Discard the base entirely.
    Replace,
    /// One-level shallow merge; updates win on key collision.
    Merge,
    /// Recursive merge of nested objects; arrays and scalars are replaced
    /// wholesale, never merged element-wise.
    DeepMerge,
}

/// One scoped context record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedContextState {
    /// The scoped context payload.
    #[serde(default)]
    pub context_data: ContextMap,
    /// Record metadata (provenance, labels).
    #[serde(default)]
    pub metadata: ContextMap,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time — drives the TTL freshness check.
    pub updated_at: DateTime<Utc>,
    /// Optional hard expiry; past this instant the record is stale
    /// regardless of TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UnifiedContextState {
    /// Create a record with fresh timestamps and no expiry.
    #[must_use]
    pub fn new(context_data: ContextMap) -> Self {
        let now = Utc::now();
        Self {
            context_data,
            metadata: ContextMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }
}

/// Options for [`MultiLevelContextStore::update`].
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// Shallow-merge onto the existing record instead of replacing its
    /// `context_data` wholesale.
    pub merge: bool,
    /// Hard expiry for the updated record.
    pub expires_at: Option<DateTime<Utc>>,
    /// Replacement metadata (kept when `None`).
    pub metadata: Option<ContextMap>,
}

/// All three scopes for one `(session, user)` pair plus the folded view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLevelContext {
    /// The session-level record, if present.
    pub session: Option<UnifiedContextState>,
    /// The user-level record, if present (absent without a `user_id`).
    pub user: Option<UnifiedContextState>,
    /// The global record, if present.
    pub global: Option<UnifiedContextState>,
    /// Folded context: global < user < session.
    pub merged: ContextMap,
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge strategies
// ─────────────────────────────────────────────────────────────────────────────

/// Combine two context maps under a strategy. Neither input is mutated.
#[must_use]
pub fn merge_context(base: &ContextMap, updates: &ContextMap, strategy: MergeStrategy) -> ContextMap {
    match strategy {
        MergeStrategy::Replace => updates.clone(),
        MergeStrategy::Merge => {
            let mut out = base.clone();
            for (key, value) in updates {
                let _ = out.insert(key.clone(), value.clone());
            }
            out
        }
        MergeStrategy::DeepMerge => deep_merge_maps(base, updates),
    }
}

fn deep_merge_maps(base: &ContextMap, updates: &ContextMap) -> ContextMap {
    let mut out = base.clone();
    for (key, value) in updates {
        let merged = match (out.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                Value::Object(deep_merge_maps(existing, incoming))
            }
            // Arrays and scalars replace wholesale.
            _ => value.clone(),
        };
        let _ = out.insert(key.clone(), merged);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Scoped context store with an in-process TTL cache.
///
/// Cache key is `"{session_id}_{user_id|anonymous}_{level}"`. A hit is
/// honored only while fresh: `expires_at` (when set) in the future AND
/// age since `updated_at` under the TTL. Stale entries fall through to
/// the storage collaborator and refresh the cache.
pub struct MultiLevelContextStore {
    storage: Arc<dyn ContextStorage>,
    cache: DashMap<String, UnifiedContextState>,
    ttl: Duration,
}

impl MultiLevelContextStore {
    /// Create a store over the given storage collaborator.
    #[must_use]
    pub fn new(storage: Arc<dyn ContextStorage>, ttl: Duration) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
            ttl,
        }
    }

    fn cache_key(session_id: &str, user_id: Option<&str>, level: ContextLevel) -> String {
        let user = user_id.unwrap_or("anonymous");
        format!("{session_id}_{user}_{}", level.as_str())
    }

    /// The storage key for a scope: the session id, `user_{id}`, or the
    /// `"global"` singleton.
    fn record_key(session_id: &str, user_id: Option<&str>, level: ContextLevel) -> Option<String> {
        match level {
            ContextLevel::Session => Some(session_id.to_string()),
            ContextLevel::User => user_id.map(|u| format!("user_{u}")),
            ContextLevel::Global => Some("global".to_string()),
        }
    }

    fn is_fresh(&self, state: &UnifiedContextState, now: DateTime<Utc>) -> bool {
        if let Some(expires_at) = state.expires_at {
            if expires_at <= now {
                return false;
            }
        }
        let age = now.signed_duration_since(state.updated_at);
        age < chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Get one scoped record.
    ///
    /// A user-level lookup without a `user_id` yields `None` (not an
    /// error). Stale cache entries are reloaded from storage.
    #[instrument(skip(self), fields(session_id, level = %level))]
    pub async fn get(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        level: ContextLevel,
    ) -> Result<Option<UnifiedContextState>> {
        let Some(record_key) = Self::record_key(session_id, user_id, level) else {
            return Ok(None);
        };
        let cache_key = Self::cache_key(session_id, user_id, level);
        let now = Utc::now();

        if let Some(cached) = self.cache.get(&cache_key) {
            if self.is_fresh(&cached, now) {
                counter!("context_cache_hits_total").increment(1);
                return Ok(Some(cached.clone()));
            }
            debug!(cache_key, "cache entry stale, reloading");
        }
        counter!("context_cache_misses_total").increment(1);

        let loaded = self.storage.load_scoped(&record_key, level).await?;
        match loaded {
            Some(state) => {
                let _ = self.cache.insert(cache_key, state.clone());
                Ok(Some(state))
            }
            None => {
                let _ = self.cache.remove(&cache_key);
                Ok(None)
            }
        }
    }

    /// Update one scoped record and write it through to storage.
    ///
    /// With `opts.merge` the updates are shallow-merged onto the existing
    /// record's data; otherwise `context_data` is replaced wholesale.
    /// `created_at` is preserved across updates of an existing record.
    #[instrument(skip(self, updates, opts), fields(session_id, level = %level))]
    pub async fn update(
        &self,
        session_id: &str,
        updates: ContextMap,
        user_id: Option<&str>,
        level: ContextLevel,
        opts: UpdateOptions,
    ) -> Result<UnifiedContextState> {
        let existing = self.get(session_id, user_id, level).await?;
        let now = Utc::now();

        let context_data = match (&existing, opts.merge) {
            (Some(prior), true) => merge_context(&prior.context_data, &updates, MergeStrategy::Merge),
            _ => updates,
        };

        let state = UnifiedContextState {
            context_data,
            metadata: opts
                .metadata
                .or_else(|| existing.as_ref().map(|e| e.metadata.clone()))
                .unwrap_or_default(),
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
            expires_at: opts.expires_at,
        };

        if let Some(record_key) = Self::record_key(session_id, user_id, level) {
            self.storage.save_scoped(&record_key, level, &state).await?;
            let cache_key = Self::cache_key(session_id, user_id, level);
            let _ = self.cache.insert(cache_key, state.clone());
        }
        Ok(state)
    }

    /// Delete the persisted record and cache entry for one scope.
    ///
    /// `level` defaults to `Session` — an intentional narrowing: callers
    /// needing a full wipe must clear each level explicitly.
    #[instrument(skip(self), fields(session_id))]
    pub async fn clear(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        level: Option<ContextLevel>,
    ) -> Result<()> {
        let level = level.unwrap_or(ContextLevel::Session);
        if let Some(record_key) = Self::record_key(session_id, user_id, level) {
            self.storage.delete_scoped(&record_key, level).await?;
        }
        let _ = self.cache.remove(&Self::cache_key(session_id, user_id, level));
        Ok(())
    }

    /// Fetch all three scopes concurrently and fold them.
    ///
    /// Precedence on key collision: global < user < session. A missing
    /// `user_id` skips the user-level lookup entirely.
    #[instrument(skip(self), fields(session_id))]
    pub async fn get_multi_level(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<MultiLevelContext> {
        let (session, user, global) = tokio::join!(
            self.get(session_id, user_id, ContextLevel::Session),
            async {
                if user_id.is_some() {
                    self.get(session_id, user_id, ContextLevel::User).await
                } else {
                    Ok(None)
                }
            },
            self.get(session_id, user_id, ContextLevel::Global),
        );
        let (session, user, global) = (session?, user?, global?);

        let mut merged = ContextMap::new();
        for state in [global.as_ref(), user.as_ref(), session.as_ref()].into_iter().flatten() {
            merged = merge_context(&merged, &state.context_data, MergeStrategy::Merge);
        }

        Ok(MultiLevelContext {
            session,
            user,
            global,
            merged,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
