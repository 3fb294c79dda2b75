//! Construction errors
//!
//! Raised while a chain is being built, before any virtual user runs. They
//! are fatal: a scenario that fails construction never reaches the engine.

/// Invalid chain definition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstructionError {
    /// `do_switch` closed with no choices
    #[error("switch must have at least one choice")]
    EmptySwitch,

    /// `random_switch` / `uniform_random_switch` closed with no choices
    #[error("random switch must have at least one choice")]
    EmptyRandomSwitch,

    /// A random switch weight is negative or not a number
    #[error("invalid random switch weight {0}")]
    InvalidWeight(f64),

    /// Random switch percentages add up to more than 100
    #[error("random switch weights sum to {total}%, more than 100%")]
    WeightsExceed100 {
        /// Sum of the declared percentages
        total: f64,
    },

    /// `try_max` with a constant attempt count of zero
    #[error("try_max needs at least one attempt")]
    ZeroAttempts,

    /// A block reuses the counter name of a block nested inside it
    #[error("counter '{0}' is reused by a nested block")]
    CounterReuse(String),

    /// Scenario created with a blank name
    #[error("scenario name must not be empty")]
    EmptyScenarioName,
}

impl ConstructionError {
    /// Check if the error is about random switch weights
    #[inline]
    #[must_use]
    pub fn is_weight_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidWeight(_) | Self::WeightsExceed100 { .. }
        )
    }
}
