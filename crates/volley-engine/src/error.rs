//! Error types for the volley engine
//!
//! Only run-level failures surface here. Everything that goes wrong inside a
//! virtual user's chain is recorded on its session instead.

use volley_chain::ConstructionError;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A virtual user task panicked or was cancelled
    #[error("virtual user task failed: {0}")]
    Join(String),

    /// Scenario could not be built
    #[error("construction failed: {0}")]
    Construction(#[from] ConstructionError),
}

impl EngineError {
    /// Check if the error happened before any user was started
    #[inline]
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Construction(_))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for the configuration schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
