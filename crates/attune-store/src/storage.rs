//! The storage collaborator seam.
//!
//! The engine never talks to a database directly — everything durable goes
//! through [`ContextStorage`]. The platform wires its real adapter in at
//! the composition root; [`MemoryStorage`] is the in-process reference
//! implementation used by tests and local development.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use attune_core::{
    AdaptationRule, ContextSnapshot, ContextState, EngineError, ExperimentConfig,
    PersonalizedContext, Prompt, Result,
};

use crate::multi_level::{ContextLevel, UnifiedContextState};

/// Async storage collaborator consumed by the engine.
///
/// All methods are keyed by `(user_id, session_id)` where applicable.
/// Implementations map errors into [`EngineError::Persistence`]; the
/// engine decides per call site whether a persistence failure is fatal
/// (reads generally are, fire-and-forget writes never are).
#[async_trait]
pub trait ContextStorage: Send + Sync {
    /// Fetch a prompt visible to `user_id`. `None` when it does not exist.
    async fn get_prompt(&self, id: &str, user_id: &str) -> Result<Option<Prompt>>;

    /// Load a previously persisted session state.
    async fn load_context_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ContextState>>;

    /// Persist a full session state (replace semantics).
    async fn save_context_session(&self, state: &ContextState) -> Result<()>;

    /// Persist one interaction snapshot for a session.
    async fn save_interaction(
        &self,
        user_id: &str,
        session_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<()>;

    /// Load the user's adaptation rules (owned copy per session).
    async fn load_adaptation_rules(&self, user_id: &str) -> Result<Vec<AdaptationRule>>;

    /// Load the user's personalization profile.
    async fn load_user_profile(&self, user_id: &str) -> Result<PersonalizedContext>;

    /// Load the session's experiment assignment, if any.
    async fn load_experiment_config(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ExperimentConfig>>;

    /// Record a numeric metric (best-effort, analytics out of scope).
    async fn record_metric(&self, name: &str, value: f64) -> Result<()>;

    /// Load a scoped context record by storage key and level.
    async fn load_scoped(
        &self,
        key: &str,
        level: ContextLevel,
    ) -> Result<Option<UnifiedContextState>>;

    /// Persist a scoped context record (replace semantics).
    async fn save_scoped(
        &self,
        key: &str,
        level: ContextLevel,
        state: &UnifiedContextState,
    ) -> Result<()>;

    /// Delete a scoped context record.
    async fn delete_scoped(&self, key: &str, level: ContextLevel) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory reference implementation
// ─────────────────────────────────────────────────────────────────────────────

/// `DashMap`-backed [`ContextStorage`].
///
/// Used by tests and local development. `fail_writes` lets tests exercise
/// the engine's best-effort persistence path.
#[derive(Default)]
pub struct MemoryStorage {
    prompts: DashMap<String, Prompt>,
    sessions: DashMap<String, ContextState>,
    interactions: DashMap<String, Vec<ContextSnapshot>>,
    rules: DashMap<String, Vec<AdaptationRule>>,
    profiles: DashMap<String, PersonalizedContext>,
    experiments: DashMap<String, ExperimentConfig>,
    scoped: DashMap<String, UnifiedContextState>,
    metrics: DashMap<String, f64>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}_{session_id}")
    }

    fn scoped_key(key: &str, level: ContextLevel) -> String {
        format!("{key}:{}", level.as_str())
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(EngineError::Persistence("injected write failure".into()));
        }
        Ok(())
    }

    /// Seed a prompt.
    pub fn put_prompt(&self, prompt: Prompt) {
        let _ = self.prompts.insert(prompt.id.clone(), prompt);
    }

    /// Seed a user's adaptation rules.
    pub fn put_rules(&self, user_id: &str, rules: Vec<AdaptationRule>) {
        let _ = self.rules.insert(user_id.to_string(), rules);
    }

    /// Seed a user's personalization profile.
    pub fn put_profile(&self, user_id: &str, profile: PersonalizedContext) {
        let _ = self.profiles.insert(user_id.to_string(), profile);
    }

    /// Seed a session's experiment assignment.
    pub fn put_experiment(&self, user_id: &str, session_id: &str, config: ExperimentConfig) {
        let _ = self
            .experiments
            .insert(Self::session_key(user_id, session_id), config);
    }

    /// Make all subsequent writes fail (test hook).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Interactions persisted for a session (test observation hook).
    #[must_use]
    pub fn interactions_for(&self, user_id: &str, session_id: &str) -> Vec<ContextSnapshot> {
        self.interactions
            .get(&Self::session_key(user_id, session_id))
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContextStorage for MemoryStorage {
    async fn get_prompt(&self, id: &str, _user_id: &str) -> Result<Option<Prompt>> {
        Ok(self.prompts.get(id).map(|p| p.clone()))
    }

    async fn load_context_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ContextState>> {
        Ok(self
            .sessions
            .get(&Self::session_key(user_id, session_id))
            .map(|s| s.clone()))
    }

    async fn save_context_session(&self, state: &ContextState) -> Result<()> {
        self.check_writes()?;
        let key = Self::session_key(&state.user_id, &state.session_id);
        let _ = self.sessions.insert(key, state.clone());
        Ok(())
    }

    async fn save_interaction(
        &self,
        user_id: &str,
        session_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<()> {
        self.check_writes()?;
        self.interactions
            .entry(Self::session_key(user_id, session_id))
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn load_adaptation_rules(&self, user_id: &str) -> Result<Vec<AdaptationRule>> {
        Ok(self.rules.get(user_id).map(|r| r.clone()).unwrap_or_default())
    }

    async fn load_user_profile(&self, user_id: &str) -> Result<PersonalizedContext> {
        Ok(self
            .profiles
            .get(user_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn load_experiment_config(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ExperimentConfig>> {
        Ok(self
            .experiments
            .get(&Self::session_key(user_id, session_id))
            .map(|e| e.clone()))
    }

    async fn record_metric(&self, name: &str, value: f64) -> Result<()> {
        self.check_writes()?;
        let _ = self.metrics.insert(name.to_string(), value);
        Ok(())
    }

    async fn load_scoped(
        &self,
        key: &str,
        level: ContextLevel,
    ) -> Result<Option<UnifiedContextState>> {
        Ok(self
            .scoped
            .get(&Self::scoped_key(key, level))
            .map(|s| s.clone()))
    }

    async fn save_scoped(
        &self,
        key: &str,
        level: ContextLevel,
        state: &UnifiedContextState,
    ) -> Result<()> {
        self.check_writes()?;
        let _ = self
            .scoped
            .insert(Self::scoped_key(key, level), state.clone());
        Ok(())
    }

    async fn delete_scoped(&self, key: &str, level: ContextLevel) -> Result<()> {
        self.check_writes()?;
        let _ = self.scoped.remove(&Self::scoped_key(key, level));
        Ok(())
    }
}
