//! Settings error types.

use thiserror::Error;

/// Errors produced while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON, or the merged document does
    /// not match the settings schema.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
