//! Attribute values
//!
//! Session attributes and feeder records hold JSON values. [`FromValue`]
//! converts them into the typed values control-flow actions need
//! (booleans for conditions, durations for pacing, counts for loops).

use crate::error::EvaluationError;
use std::time::Duration;

pub use serde_json::Value;

/// Conversion from an attribute value into a typed value
pub trait FromValue: Sized {
    /// Convert, failing with [`EvaluationError::TypeMismatch`] on a shape mismatch
    fn from_value(value: Value) -> Result<Self, EvaluationError>;
}

impl FromValue for Value {
    #[inline]
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match &value {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(EvaluationError::mismatch("boolean", &value)),
            },
            _ => Err(EvaluationError::mismatch("boolean", &value)),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match &value {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| EvaluationError::mismatch("unsigned integer", &value)),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| EvaluationError::mismatch("unsigned integer", &value)),
            _ => Err(EvaluationError::mismatch("unsigned integer", &value)),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        let wide = u64::from_value(value)?;
        u32::try_from(wide).map_err(|_| EvaluationError::TypeMismatch {
            expected: "32-bit unsigned integer",
            found: wide.to_string(),
        })
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match &value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| EvaluationError::mismatch("integer", &value)),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| EvaluationError::mismatch("integer", &value)),
            _ => Err(EvaluationError::mismatch("integer", &value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match &value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| EvaluationError::mismatch("number", &value)),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| EvaluationError::mismatch("number", &value)),
            _ => Err(EvaluationError::mismatch("number", &value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match value {
            Value::Array(items) => Ok(items),
            other => Err(EvaluationError::mismatch("array", &other)),
        }
    }
}

/// Durations: a number is a count of seconds, a string may carry a unit
/// suffix (`ms`, `s`, `m`, `h`) and defaults to seconds.
impl FromValue for Duration {
    fn from_value(value: Value) -> Result<Self, EvaluationError> {
        match &value {
            Value::Number(n) => n
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| EvaluationError::mismatch("duration", &value)),
            Value::String(s) => {
                parse_duration(s).ok_or_else(|| EvaluationError::mismatch("duration", &value))
            }
            _ => Err(EvaluationError::mismatch("duration", &value)),
        }
    }
}

/// Parse `"250ms"`, `"5s"`, `"2m"`, `"1h"` or a bare number of seconds
#[must_use]
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: f64 = amount.parse().ok()?;
    let secs = match unit.trim() {
        "" | "s" => amount,
        "ms" => amount / 1_000.0,
        "m" => amount * 60.0,
        "h" => amount * 3_600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

/// Structural equality that treats numbers by value (`1 == 1.0`).
///
/// Two integers compare exactly; floats only come into play when one side
/// is a float.
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        _ => left == right,
    }
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        };
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    // a negative i64 against a u64 above i64::MAX
    false
}
