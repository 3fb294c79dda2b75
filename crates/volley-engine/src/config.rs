//! Engine configuration
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! seed = 42
//! max_duration_secs = 300
//!
//! [injection]
//! type = "ramp"
//! users = 100
//! over_secs = 10
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How virtual users are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Injection {
    /// Start every user immediately
    AtOnce {
        /// Number of users
        users: u64,
    },
    /// Start users evenly spaced over a period
    Ramp {
        /// Number of users
        users: u64,
        /// Length of the ramp in seconds
        over_secs: u64,
    },
}

impl Injection {
    /// Total number of users
    #[inline]
    #[must_use]
    pub fn users(&self) -> u64 {
        match self {
            Self::AtOnce { users } | Self::Ramp { users, .. } => *users,
        }
    }

    /// Start offset of the user with zero-based `index`, relative to the
    /// start of the run
    #[must_use]
    pub fn offset(&self, index: u64) -> Duration {
        match *self {
            Self::AtOnce { .. } => Duration::ZERO,
            Self::Ramp { users, over_secs } if users > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let fraction = index as f64 / users as f64;
                Duration::from_secs(over_secs).mul_f64(fraction)
            }
            Self::Ramp { .. } => Duration::ZERO,
        }
    }
}

/// Longest ramp or run deadline accepted, about a hundred years
pub const MAX_CONFIGURED_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl Default for Injection {
    fn default() -> Self {
        Self::AtOnce { users: 1 }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// User injection profile
    pub injection: Injection,
    /// Base seed for per-user random generators; OS entropy when absent
    pub seed: Option<u64>,
    /// Stop the run after this many seconds
    pub max_duration_secs: Option<u64>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an injection profile
    #[inline]
    #[must_use]
    pub fn with_injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    /// Start `users` users at once
    #[inline]
    #[must_use]
    pub fn at_once(self, users: u64) -> Self {
        self.with_injection(Injection::AtOnce { users })
    }

    /// Ramp `users` users over `over_secs` seconds
    #[inline]
    #[must_use]
    pub fn ramp(self, users: u64, over_secs: u64) -> Self {
        self.with_injection(Injection::Ramp { users, over_secs })
    }

    /// With a base seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// With a maximum run duration
    #[inline]
    #[must_use]
    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    /// Maximum run duration
    #[inline]
    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    /// Parse TOML and validate
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate
    ///
    /// # Errors
    /// `ConfigError::Io`, `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` when no user would be injected, the maximum
    /// duration is zero, or a duration exceeds [`MAX_CONFIGURED_SECS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.injection.users() == 0 {
            return Err(ConfigError::Invalid(
                "injection must start at least one user".into(),
            ));
        }
        if self.max_duration_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "max_duration_secs must be greater than zero".into(),
            ));
        }
        if self.max_duration_secs.is_some_and(|secs| secs > MAX_CONFIGURED_SECS) {
            return Err(ConfigError::Invalid(format!(
                "max_duration_secs must not exceed {MAX_CONFIGURED_SECS}"
            )));
        }
        if let Injection::Ramp { over_secs, .. } = self.injection {
            if over_secs > MAX_CONFIGURED_SECS {
                return Err(ConfigError::Invalid(format!(
                    "ramp over_secs must not exceed {MAX_CONFIGURED_SECS}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            injection: Injection::default(),
            seed: None,
            max_duration_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_ramp_profile() {
        let config = EngineConfig::from_toml_str(
            r#"
            seed = 7
            max_duration_secs = 30

            [injection]
            type = "ramp"
            users = 4
            over_secs = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.injection, Injection::Ramp { users: 4, over_secs: 8 });
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn zero_users_is_invalid() {
        let err = EngineConfig::from_toml_str("[injection]\ntype = \"at_once\"\nusers = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_injection_type_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("[injection]\ntype = \"burst\"\nusers = 3\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[injection]\ntype = \"at_once\"\nusers = 12").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.injection.users(), 12);

        assert!(matches!(
            EngineConfig::load("/no/such/volley.toml").unwrap_err(),
            ConfigError::Io(_)
        ));
    }

    #[test]
    fn ramp_offsets_are_evenly_spaced() {
        let ramp = Injection::Ramp {
            users: 4,
            over_secs: 8,
        };
        let offsets: Vec<Duration> = (0..4).map(|i| ramp.offset(i)).collect();
        assert_eq!(
            offsets,
            [0, 2, 4, 6].map(Duration::from_secs).to_vec()
        );
        assert_eq!(Injection::AtOnce { users: 3 }.offset(2), Duration::ZERO);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let huge = EngineConfig::new().with_max_duration_secs(u64::MAX);
        assert!(matches!(huge.validate(), Err(ConfigError::Invalid(_))));

        let ramp = EngineConfig::new().ramp(2, MAX_CONFIGURED_SECS + 1);
        assert!(matches!(ramp.validate(), Err(ConfigError::Invalid(_))));

        let edge = EngineConfig::new()
            .ramp(2, MAX_CONFIGURED_SECS)
            .with_max_duration_secs(MAX_CONFIGURED_SECS);
        assert!(edge.validate().is_ok());
    }
}
