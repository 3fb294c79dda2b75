//! Scenarios
//!
//! A [`Scenario`] is the output of the construction phase: a named chain
//! plus the expression engine its value sources are evaluated with. The
//! engine only accepts scenarios, never raw builders.

use crate::chain::Chain;
use crate::error::ConstructionError;
use std::sync::Arc;
use volley_core::{ExpressionEngine, SimpleExpressions};

/// Named, validated chain ready for execution
#[derive(Debug, Clone)]
pub struct Scenario {
    name: Arc<str>,
    chain: Chain,
    expressions: Arc<dyn ExpressionEngine>,
}

impl Scenario {
    /// Create a scenario evaluated with [`SimpleExpressions`]
    ///
    /// # Errors
    /// `ConstructionError::EmptyScenarioName` if `name` is blank
    pub fn new(name: impl Into<Arc<str>>, chain: Chain) -> Result<Self, ConstructionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConstructionError::EmptyScenarioName);
        }
        Ok(Self {
            name,
            chain,
            expressions: Arc::new(SimpleExpressions::new()),
        })
    }

    /// Use another expression engine
    #[must_use]
    pub fn with_expressions(mut self, expressions: Arc<dyn ExpressionEngine>) -> Self {
        self.expressions = expressions;
        self
    }

    /// Scenario name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name
    #[inline]
    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Top-level chain
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Expression engine
    #[inline]
    #[must_use]
    pub fn expressions(&self) -> &dyn ExpressionEngine {
        self.expressions.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        assert_eq!(
            Scenario::new("  ", Chain::new()).unwrap_err(),
            ConstructionError::EmptyScenarioName
        );
        let scenario = Scenario::new("checkout", Chain::new().exit_here()).unwrap();
        assert_eq!(scenario.name(), "checkout");
        assert_eq!(scenario.chain().len(), 1);
    }
}
