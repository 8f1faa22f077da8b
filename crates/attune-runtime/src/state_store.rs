//! In-memory session state cache over the storage collaborator.
//!
//! One [`ContextState`] per `(user, session)`, cached by key
//! `"{user_id}_{session_id}"`. There is no lock guarding a record:
//! two concurrent requests for the same session read-modify-write
//! non-atomically and can lose an update. Accepted limitation — the
//! platform's sessions are single-writer in practice.
//!
//! Durable writes are fire-and-forget: the caller gets its response
//! before the write is confirmed, so in-memory and durable state may
//! diverge (at-most-once durability).

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, error, instrument};

use attune_core::{ContextSnapshot, ContextState, Result};
use attune_settings::ContextSettings;
use attune_store::ContextStorage;

/// Session state store.
pub struct ContextStateStore {
    storage: Arc<dyn ContextStorage>,
    sessions: DashMap<String, ContextState>,
    settings: ContextSettings,
}

impl ContextStateStore {
    /// Create a store over the given storage collaborator.
    #[must_use]
    pub fn new(storage: Arc<dyn ContextStorage>, settings: ContextSettings) -> Self {
        Self {
            storage,
            sessions: DashMap::new(),
            settings,
        }
    }

    fn key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}_{session_id}")
    }

    /// History cap configuration for callers that mutate state.
    #[must_use]
    pub fn history_limits(&self) -> (usize, usize) {
        (self.settings.history_max, self.settings.history_trim_to)
    }

    /// Resolve or create the session's state.
    ///
    /// Cache hit returns a clone. On miss, a previously persisted session
    /// is restored from storage; otherwise a fresh state is built with
    /// the user's rules, profile, and experiment assignment.
    #[instrument(skip(self), fields(user_id, session_id))]
    pub async fn get_or_create(&self, user_id: &str, session_id: &str) -> Result<ContextState> {
        let key = Self::key(user_id, session_id);
        if let Some(cached) = self.sessions.get(&key) {
            return Ok(cached.clone());
        }

        if let Some(restored) = self.storage.load_context_session(user_id, session_id).await? {
            debug!(session_id, "session state restored from storage");
            let _ = self.sessions.insert(key, restored.clone());
            return Ok(restored);
        }

        let mut state = ContextState::new(user_id, session_id);
        state.adaptation_rules = self.storage.load_adaptation_rules(user_id).await?;
        state.personalized_data = self.storage.load_user_profile(user_id).await?;
        state.experiment = self
            .storage
            .load_experiment_config(user_id, session_id)
            .await?;
        debug!(
            session_id,
            rules = state.adaptation_rules.len(),
            "fresh session state created"
        );
        let _ = self.sessions.insert(key, state.clone());
        Ok(state)
    }

    /// Replace the cached state for a session.
    pub fn put(&self, state: ContextState) {
        let key = Self::key(&state.user_id, &state.session_id);
        let _ = self.sessions.insert(key, state);
    }

    /// Drop a session from the in-memory cache (does not touch storage).
    pub fn evict(&self, user_id: &str, session_id: &str) {
        let _ = self.sessions.remove(&Self::key(user_id, session_id));
    }

    /// Number of cached sessions.
    #[must_use]
    pub fn cached_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Persist a state and its newest snapshot as a detached background
    /// task.
    ///
    /// Best-effort: failures are logged and counted, never surfaced. The
    /// returned handle lets tests await completion; production callers
    /// drop it.
    pub fn persist_detached(
        &self,
        state: ContextState,
        snapshot: ContextSnapshot,
    ) -> tokio::task::JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            if let Err(e) = storage.save_context_session(&state).await {
                counter!("context_persist_failures_total").increment(1);
                error!(
                    user_id = %state.user_id,
                    session_id = %state.session_id,
                    error = %e,
                    "session state persistence failed"
                );
                return;
            }
            if let Err(e) = storage
                .save_interaction(&state.user_id, &state.session_id, &snapshot)
                .await
            {
                counter!("context_persist_failures_total").increment(1);
                error!(
                    user_id = %state.user_id,
                    session_id = %state.session_id,
                    error = %e,
                    "interaction persistence failed"
                );
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use attune_core::context::ContextMap;
    use attune_core::{ActionKind, AdaptationRule, RuleAction};
    use attune_store::MemoryStorage;
    use serde_json::json;

    fn make_store(memory: Arc<MemoryStorage>) -> ContextStateStore {
        ContextStateStore::new(memory, ContextSettings::default())
    }

    fn noop_rule(id: &str) -> AdaptationRule {
        AdaptationRule::new(
            id,
            "noop",
            "always",
            RuleAction {
                kind: ActionKind::Append,
                target: String::new(),
                value: Some(json!("")),
                template: None,
            },
            1,
        )
    }

    #[tokio::test]
    async fn fresh_state_loads_collaborator_data() {
        let memory = Arc::new(MemoryStorage::new());
        memory.put_rules("u1", vec![noop_rule("r1"), noop_rule("r2")]);
        let store = make_store(Arc::clone(&memory));

        let state = store.get_or_create("u1", "s1").await.unwrap();
        assert_eq!(state.adaptation_rules.len(), 2);
        assert_eq!(state.session_id, "s1");
        assert_eq!(store.cached_sessions(), 1);
    }

    #[tokio::test]
    async fn cache_hit_avoids_storage() {
        let memory = Arc::new(MemoryStorage::new());
        let store = make_store(Arc::clone(&memory));

        let mut state = store.get_or_create("u1", "s1").await.unwrap();
        let _ = state.current_context.insert("marker".into(), json!(1));
        store.put(state);

        // Rules seeded after first load must NOT appear: owned copy is
        // loaded once at session creation, not live-reloaded.
        memory.put_rules("u1", vec![noop_rule("late")]);
        let again = store.get_or_create("u1", "s1").await.unwrap();
        assert!(again.adaptation_rules.is_empty());
        assert_eq!(again.current_context["marker"], json!(1));
    }

    #[tokio::test]
    async fn persisted_session_is_restored() {
        let memory = Arc::new(MemoryStorage::new());
        let mut prior = ContextState::new("u1", "s1");
        let _ = prior.current_context.insert("restored".into(), json!(true));
        memory.save_context_session(&prior).await.unwrap();

        let store = make_store(Arc::clone(&memory));
        let state = store.get_or_create("u1", "s1").await.unwrap();
        assert_eq!(state.current_context["restored"], json!(true));
    }

    #[tokio::test]
    async fn detached_persist_writes_state_and_interaction() {
        let memory = Arc::new(MemoryStorage::new());
        let store = make_store(Arc::clone(&memory));

        let state = ContextState::new("u1", "s1");
        let snapshot = ContextSnapshot::new("test", ContextMap::new());
        store.persist_detached(state, snapshot).await.unwrap();

        assert!(memory.load_context_session("u1", "s1").await.unwrap().is_some());
        assert_eq!(memory.interactions_for("u1", "s1").len(), 1);
    }

    #[tokio::test]
    async fn detached_persist_failure_is_swallowed() {
        let memory = Arc::new(MemoryStorage::new());
        memory.set_fail_writes(true);
        let store = make_store(Arc::clone(&memory));

        let state = ContextState::new("u1", "s1");
        let snapshot = ContextSnapshot::new("test", ContextMap::new());
        // The task completes without panicking; the error is only logged.
        store.persist_detached(state, snapshot).await.unwrap();

        assert!(memory.interactions_for("u1", "s1").is_empty());
    }

    #[tokio::test]
    async fn evict_drops_only_the_cache() {
        let memory = Arc::new(MemoryStorage::new());
        let store = make_store(Arc::clone(&memory));

        let _ = store.get_or_create("u1", "s1").await.unwrap();
        store.evict("u1", "s1");
        assert_eq!(store.cached_sessions(), 0);
    }
}
