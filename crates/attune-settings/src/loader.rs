//! Settings loading: defaults → file deep-merge → env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::SettingsError;
use crate::types::AttuneSettings;

/// Default settings file location: `~/.attune/settings.json`.
///
/// Falls back to a relative path when `HOME` is unset (containers, tests).
#[must_use]
pub fn settings_path() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => Path::new(&home).join(".attune").join("settings.json"),
        Err(_) => PathBuf::from(".attune/settings.json"),
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Objects merge recursively key-by-key; arrays and scalars in the overlay
/// replace the base value wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Load settings from the default path with env overrides.
///
/// A missing file is not an error — defaults plus env apply.
pub fn load_settings() -> Result<AttuneSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file path.
///
/// Reads the file (if present), deep-merges it over compiled defaults,
/// applies `ATTUNE_*` env overrides, validates, and returns the result.
pub fn load_settings_from_path(path: &Path) -> Result<AttuneSettings, SettingsError> {
    let mut merged = serde_json::to_value(AttuneSettings::default())?;

    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(&mut merged, file_value);
        tracing::debug!(?path, "settings file merged");
    }

    let mut settings: AttuneSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `ATTUNE_*` environment variable overrides (highest priority).
///
/// Unparseable values are ignored with a warning rather than failing the
/// load.
fn apply_env_overrides(settings: &mut AttuneSettings) {
    fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
        let raw = std::env::var(name).ok()?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
                None
            }
        }
    }

    if let Some(v) = parse_env::<u64>("ATTUNE_STAGE_TIMEOUT_MS") {
        settings.orchestrator.default_stage_timeout_ms = v;
    }
    if let Some(v) = parse_env::<u64>("ATTUNE_CACHE_TTL_SECS") {
        settings.context.cache_ttl_secs = v;
    }
    if let Some(v) = parse_env::<usize>("ATTUNE_HISTORY_MAX") {
        settings.context.history_max = v;
    }
    if let Some(v) = parse_env::<usize>("ATTUNE_HISTORY_TRIM_TO") {
        settings.context.history_trim_to = v;
    }
    if let Some(v) = parse_env::<usize>("ATTUNE_RECENT_WINDOW") {
        settings.context.recent_window = v;
    }
    if let Ok(v) = std::env::var("ATTUNE_SCHEMA_VERSION") {
        settings.orchestrator.schema_version = v;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
