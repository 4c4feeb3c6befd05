use thiserror::Error;

/// Settings loading and mutation errors
///
/// Rejected mutations never reach downstream clients; they surface to
/// whoever attempted the edit.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("failed to read settings file {path}: {message}")]
    Io { path: String, message: String },

    /// `{{ env.VAR }}` expansion failed
    #[error("settings variable expansion failed: {0}")]
    Expansion(String),

    /// TOML deserialization failed
    #[error("failed to parse settings: {0}")]
    Parse(String),

    /// Settings are internally inconsistent
    #[error("invalid settings: {0}")]
    Invalid(String),
}
