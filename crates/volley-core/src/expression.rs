//! Expression evaluation
//!
//! Expression strings are opaque to the engine: they are handed to an
//! [`ExpressionEngine`] together with the session. [`SimpleExpressions`] is the
//! default engine and understands:
//! - `#{name}` attribute interpolation (a lone `#{name}` keeps the value's type)
//! - `#{name.exists()}`, `#{name.isUndefined()}`, `#{name.size()}`
//! - one top-level `==` or `!=` between two templates
//!
//! Text without any of the above evaluates to itself.

use crate::error::EvaluationError;
use crate::session::Session;
use crate::value::{values_equal, Value};
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#\{\s*([A-Za-z_][\w\-]*)(?:\.(exists|isUndefined|size)\(\))?\s*\}")
        .expect("placeholder pattern is valid")
});

/// Evaluates expression strings against a session
pub trait ExpressionEngine: Send + Sync + std::fmt::Debug {
    /// Evaluate `expression` for `session`
    ///
    /// # Errors
    /// `EvaluationError` if the expression is malformed or references
    /// missing attributes
    fn evaluate(&self, expression: &str, session: &Session) -> Result<Value, EvaluationError>;
}

/// Default expression engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpressions;

impl SimpleExpressions {
    /// Create the engine
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn template(expression: &str, session: &Session) -> Result<Value, EvaluationError> {
        if expression.contains("#{") && !PLACEHOLDER.is_match(expression) {
            return Err(EvaluationError::malformed(
                expression,
                "unterminated or invalid placeholder",
            ));
        }

        // A template that is exactly one placeholder keeps the attribute's type
        if let Some(caps) = PLACEHOLDER.captures(expression) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == expression.len() {
                    return Self::placeholder(&caps, session);
                }
            }
        }

        let mut rendered = String::with_capacity(expression.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(expression) {
            let Some(whole) = caps.get(0) else { continue };
            rendered.push_str(&expression[last..whole.start()]);
            match Self::placeholder(&caps, session)? {
                Value::String(s) => rendered.push_str(&s),
                other => rendered.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        rendered.push_str(&expression[last..]);
        if rendered.contains("#{") {
            return Err(EvaluationError::malformed(expression, "invalid placeholder"));
        }
        Ok(Value::String(rendered))
    }

    fn placeholder(
        caps: &regex::Captures<'_>,
        session: &Session,
    ) -> Result<Value, EvaluationError> {
        let name = caps.get(1).map_or("", |m| m.as_str());
        match caps.get(2).map(|m| m.as_str()) {
            Some("exists") => Ok(Value::Bool(session.contains(name))),
            Some("isUndefined") => Ok(Value::Bool(!session.contains(name))),
            Some("size") => match session.get(name) {
                Some(Value::Array(items)) => Ok(Value::from(items.len())),
                Some(Value::Object(map)) => Ok(Value::from(map.len())),
                Some(Value::String(s)) => Ok(Value::from(s.chars().count())),
                Some(other) => Err(EvaluationError::mismatch("collection", other)),
                None => Err(EvaluationError::MissingAttribute(name.to_string())),
            },
            _ => session
                .get(name)
                .cloned()
                .ok_or_else(|| EvaluationError::MissingAttribute(name.to_string())),
        }
    }

    /// Rendered operands are compared as JSON literals when they parse as
    /// such, otherwise as plain strings.
    fn operand(rendered: Value) -> Value {
        match rendered {
            Value::String(s) => {
                let trimmed = s.trim();
                serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
            }
            other => other,
        }
    }
}

impl ExpressionEngine for SimpleExpressions {
    fn evaluate(&self, expression: &str, session: &Session) -> Result<Value, EvaluationError> {
        for (op, negate) in [("!=", true), ("==", false)] {
            if let Some((left, right)) = expression.split_once(op) {
                if right.contains("==") || right.contains("!=") {
                    return Err(EvaluationError::malformed(
                        expression,
                        "chained comparisons are not supported",
                    ));
                }
                let left = Self::operand(Self::template(left, session)?);
                let right = Self::operand(Self::template(right, session)?);
                return Ok(Value::Bool(values_equal(&left, &right) != negate));
            }
        }
        Self::template(expression, session)
    }
}
