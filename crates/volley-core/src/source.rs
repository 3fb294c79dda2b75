//! Value sources
//!
//! Every control-flow parameter (conditions, durations, counts, switch keys)
//! is a [`ValueSource`]: a constant, an expression string handed to the
//! [`ExpressionEngine`], or a callback over the session. The three are
//! resolved the same way, so actions never care which one they were given.

use crate::error::EvaluationError;
use crate::expression::ExpressionEngine;
use crate::session::Session;
use crate::value::{FromValue, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Callback<V> = Arc<dyn Fn(&Session) -> Result<V, EvaluationError> + Send + Sync>;

/// Something that produces a `V` for a given session
pub enum ValueSource<V> {
    /// Fixed value
    Constant(V),
    /// Expression evaluated by the engine's [`ExpressionEngine`]
    Expression(Arc<str>),
    /// Callback over the session
    Callback(Callback<V>),
}

impl<V> ValueSource<V> {
    /// Wrap an expression string
    #[inline]
    #[must_use]
    pub fn expression(expression: impl Into<Arc<str>>) -> Self {
        Self::Expression(expression.into())
    }

    /// Wrap an infallible callback
    #[must_use]
    pub fn function<F>(f: F) -> Self
    where
        V: 'static,
        F: Fn(&Session) -> V + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(move |session: &Session| Ok(f(session))))
    }

    /// Wrap a fallible callback
    #[must_use]
    pub fn try_function<F>(f: F) -> Self
    where
        F: Fn(&Session) -> Result<V, EvaluationError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// The constant, if this source is one
    #[inline]
    #[must_use]
    pub fn as_constant(&self) -> Option<&V> {
        match self {
            Self::Constant(v) => Some(v),
            _ => None,
        }
    }
}

impl<V: FromValue + Clone> ValueSource<V> {
    /// Produce the value for a session
    ///
    /// # Errors
    /// Whatever the expression engine, the conversion, or the callback reports
    pub fn resolve(
        &self,
        session: &Session,
        expressions: &dyn ExpressionEngine,
    ) -> Result<V, EvaluationError> {
        match self {
            Self::Constant(v) => Ok(v.clone()),
            Self::Expression(expr) => V::from_value(expressions.evaluate(expr, session)?),
            Self::Callback(f) => f(session),
        }
    }
}

impl<V: Clone> Clone for ValueSource<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Constant(v) => Self::Constant(v.clone()),
            Self::Expression(e) => Self::Expression(Arc::clone(e)),
            Self::Callback(f) => Self::Callback(Arc::clone(f)),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for ValueSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Self::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Strings are expressions, whatever the target type
impl<V> From<&str> for ValueSource<V> {
    fn from(expression: &str) -> Self {
        Self::expression(expression)
    }
}

impl<V> From<String> for ValueSource<V> {
    fn from(expression: String) -> Self {
        Self::expression(expression)
    }
}

impl From<bool> for ValueSource<bool> {
    fn from(v: bool) -> Self {
        Self::Constant(v)
    }
}

impl From<Duration> for ValueSource<Duration> {
    fn from(v: Duration) -> Self {
        Self::Constant(v)
    }
}

impl From<u64> for ValueSource<u64> {
    fn from(v: u64) -> Self {
        Self::Constant(v)
    }
}

impl From<u32> for ValueSource<u32> {
    fn from(v: u32) -> Self {
        Self::Constant(v)
    }
}

impl From<Value> for ValueSource<Value> {
    fn from(v: Value) -> Self {
        Self::Constant(v)
    }
}

impl From<Vec<Value>> for ValueSource<Vec<Value>> {
    fn from(v: Vec<Value>) -> Self {
        Self::Constant(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::SimpleExpressions;
    use crate::session::UserId;
    use serde_json::json;

    #[test]
    fn three_variants_resolve_alike() {
        let session = Session::new("s", UserId(0)).set("n", 3);
        let el = SimpleExpressions::new();

        let constant: ValueSource<u64> = 3.into();
        let expression: ValueSource<u64> = "#{n}".into();
        let callback = ValueSource::function(|s: &Session| s.get_as::<u64>("n").unwrap_or(0));

        for source in [constant, expression, callback] {
            assert_eq!(source.resolve(&session, &el).unwrap(), 3);
        }
    }

    #[test]
    fn expression_type_mismatch_is_reported() {
        let session = Session::new("s", UserId(0)).set("flag", json!([1]));
        let source: ValueSource<bool> = "#{flag}".into();
        assert!(matches!(
            source.resolve(&session, &SimpleExpressions::new()),
            Err(EvaluationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn fallible_callback_propagates() {
        let session = Session::new("s", UserId(0));
        let source: ValueSource<bool> =
            ValueSource::try_function(|_| Err(EvaluationError::Callback("nope".into())));
        assert_eq!(
            source.resolve(&session, &SimpleExpressions::new()),
            Err(EvaluationError::Callback("nope".into()))
        );
    }
}
