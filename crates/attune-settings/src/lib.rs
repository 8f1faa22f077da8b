//! # attune-settings
//!
//! Configuration management with layered sources for the attune engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`AttuneSettings::default()`]
//! 2. **Settings file** — JSON, deep-merged over defaults
//! 3. **Environment variables** — `ATTUNE_*` overrides (highest priority)
//!
//! There is no ambient settings singleton: the composition root loads a
//! value once and passes it into the engine constructors. Engine objects
//! never reach out to globals.
//!
//! # Usage
//!
//! ```rust,ignore
//! use attune_settings::load_settings;
//!
//! let settings = load_settings();
//! println!("stage timeout: {}ms", settings.orchestrator.default_stage_timeout_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::SettingsError;
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    AttuneSettings, ContextSettings, OrchestratorSettings, PersonalizationSettings,
};
