//! Error types for volley core
//!
//! Run-scoped failures that a virtual user can hit while its session moves
//! through a chain:
//! - Value sources that cannot produce a value
//! - Feeders that run out of records
//! - Session bookkeeping misuse (loop counters)

/// A value source failed to produce a value for a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// Expression referenced an attribute the session does not hold
    #[error("no attribute named '{0}' in session")]
    MissingAttribute(String),

    /// Attribute or expression result has the wrong shape
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the caller asked for
        expected: &'static str,
        /// Rendering of the offending value
        found: String,
    },

    /// Expression string could not be parsed
    #[error("malformed expression '{expression}': {reason}")]
    Malformed {
        /// The expression as written
        expression: String,
        /// Parser diagnostic
        reason: String,
    },

    /// A user-supplied callback reported a failure
    #[error("callback failed: {0}")]
    Callback(String),
}

impl EvaluationError {
    /// Build a type mismatch for a value
    #[inline]
    #[must_use]
    pub fn mismatch(expected: &'static str, found: &serde_json::Value) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.to_string(),
        }
    }

    /// Build a malformed-expression error
    #[inline]
    #[must_use]
    pub fn malformed(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Attribute name involved, if the error is about a missing attribute
    #[inline]
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::MissingAttribute(name) => Some(name),
            _ => None,
        }
    }
}

/// Feeder failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeederError {
    /// Queue feeder has handed out every record
    #[error("feeder '{feeder}' is exhausted")]
    Exhausted {
        /// Feeder name
        feeder: String,
    },

    /// Records could not be loaded
    #[error("failed to load feeder records: {0}")]
    Load(String),
}

impl FeederError {
    /// Check if this is the distinguishable exhaustion error
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Session bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A loop or retry block tried to enter a counter that is already active
    #[error("counter '{0}' is already in use by an enclosing block")]
    CounterInUse(String),

    /// Counter was never entered
    #[error("unknown counter '{0}'")]
    UnknownCounter(String),
}
