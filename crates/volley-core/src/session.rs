//! Per-user session state
//!
//! A [`Session`] is the state one virtual user carries through its chain:
//! - Attributes (name → JSON value)
//! - Status flag (failed or not)
//! - Loop/retry counters, kept as a stack of active scopes
//! - Pace deadlines
//!
//! Sessions are persistent values: every mutator takes `&self` and returns a
//! new session sharing structure with the old one (`im` maps, O(1) clone).

use crate::error::{EvaluationError, SessionError};
use crate::value::{FromValue, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Virtual user identifier, unique within one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// No failure recorded
    #[default]
    Active,
    /// A failure was recorded; stays until explicitly cleared
    Failed,
}

/// Bookkeeping for one loop or retry scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCounter {
    /// Zero-based index of the current iteration; once finished, the number
    /// of completed iterations
    pub iteration: u64,
    /// When the scope was entered
    pub started_at: Instant,
    /// When the scope was left, if it has been
    pub finished_at: Option<Instant>,
}

impl LoopCounter {
    /// Time spent in the scope, up to `now` while still active
    #[inline]
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.finished_at
            .unwrap_or(now)
            .saturating_duration_since(self.started_at)
    }

    /// Whether the scope has been left
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// State carried by one virtual user
#[derive(Debug, Clone)]
pub struct Session {
    scenario: Arc<str>,
    user_id: UserId,
    attributes: im::HashMap<String, Value>,
    status: Status,
    counters: im::HashMap<Arc<str>, LoopCounter>,
    active: im::Vector<Arc<str>>,
    pacers: im::HashMap<Arc<str>, Instant>,
}

impl Session {
    /// Create an empty session for a user of a scenario
    #[must_use]
    pub fn new(scenario: impl Into<Arc<str>>, user_id: UserId) -> Self {
        Self {
            scenario: scenario.into(),
            user_id,
            attributes: im::HashMap::new(),
            status: Status::Active,
            counters: im::HashMap::new(),
            active: im::Vector::new(),
            pacers: im::HashMap::new(),
        }
    }

    /// Scenario name
    #[inline]
    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// User identifier
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether a failure has been recorded
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    /// Force the failed status
    #[must_use]
    pub fn mark_as_failed(&self) -> Self {
        self.with_status(Status::Failed)
    }

    /// Clear the failed status
    #[must_use]
    pub fn mark_as_succeeded(&self) -> Self {
        self.with_status(Status::Active)
    }

    /// Replace the status
    #[must_use]
    pub fn with_status(&self, status: Status) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    /// Set one attribute, replacing any previous value
    #[must_use]
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.attributes.insert(key.into(), value.into());
        next
    }

    /// Set several attributes; later pairs win over earlier ones
    #[must_use]
    pub fn set_all<K, V, I>(&self, entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut next = self.clone();
        for (key, value) in entries {
            next.attributes.insert(key.into(), value.into());
        }
        next
    }

    /// Remove one attribute
    #[must_use]
    pub fn remove(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.attributes.remove(key);
        next
    }

    /// Remove several attributes
    #[must_use]
    pub fn remove_all<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> Self {
        let mut next = self.clone();
        for key in keys {
            next.attributes.remove(key);
        }
        next
    }

    /// Drop every user attribute. Counters of active scopes and pace
    /// deadlines survive, so enclosing loops keep working.
    #[must_use]
    pub fn reset(&self) -> Self {
        let mut next = self.clone();
        next.attributes = self
            .active
            .iter()
            .filter_map(|name| {
                self.attributes
                    .get(name.as_ref())
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect();
        next
    }

    /// Whether an attribute is present
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Raw attribute value
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Typed attribute value
    ///
    /// # Errors
    /// - `EvaluationError::MissingAttribute` if the attribute is absent
    /// - `EvaluationError::TypeMismatch` if it cannot be converted
    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<T, EvaluationError> {
        let value = self
            .attributes
            .get(key)
            .cloned()
            .ok_or_else(|| EvaluationError::MissingAttribute(key.to_string()))?;
        T::from_value(value)
    }

    /// Iterate over attributes (unordered)
    pub fn attributes(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.attributes.iter()
    }

    /// Number of attributes
    #[inline]
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Counter bookkeeping for a loop or retry scope, active or finished
    #[inline]
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<&LoopCounter> {
        self.counters.get(name)
    }

    /// Names of the active scopes, outermost first
    pub fn active_counters(&self) -> impl Iterator<Item = &str> + '_ {
        self.active.iter().map(AsRef::as_ref)
    }

    /// Whether a counter belongs to a scope that is currently active
    #[must_use]
    pub fn is_counter_active(&self, name: &str) -> bool {
        self.active.iter().any(|n| n.as_ref() == name)
    }

    /// Push a new scope. The counter attribute is set to iteration 0.
    ///
    /// Re-entering a finished counter (sibling reuse) starts it afresh.
    ///
    /// # Errors
    /// `SessionError::CounterInUse` if an enclosing scope already uses the name
    pub fn enter_counter(&self, name: &Arc<str>, now: Instant) -> Result<Self, SessionError> {
        if self.is_counter_active(name) {
            return Err(SessionError::CounterInUse(name.to_string()));
        }
        let mut next = self.clone();
        next.counters.insert(
            Arc::clone(name),
            LoopCounter {
                iteration: 0,
                started_at: now,
                finished_at: None,
            },
        );
        next.active.push_back(Arc::clone(name));
        next.attributes.insert(name.to_string(), Value::from(0u64));
        Ok(next)
    }

    /// Advance an active scope to its next iteration
    ///
    /// # Errors
    /// `SessionError::UnknownCounter` if the scope is not active
    pub fn increment_counter(&self, name: &str) -> Result<Self, SessionError> {
        let current = self
            .counters
            .get(name)
            .filter(|c| !c.is_finished())
            .ok_or_else(|| SessionError::UnknownCounter(name.to_string()))?;
        let mut next = self.clone();
        let iteration = current.iteration + 1;
        next.counters.insert(
            Arc::from(name),
            LoopCounter {
                iteration,
                ..*current
            },
        );
        next.attributes
            .insert(name.to_string(), Value::from(iteration));
        Ok(next)
    }

    /// Pop a scope. Its counter stays readable with the final iteration
    /// count and elapsed time.
    ///
    /// # Errors
    /// `SessionError::UnknownCounter` if the scope is not active
    pub fn exit_counter(&self, name: &str, now: Instant) -> Result<Self, SessionError> {
        let position = self
            .active
            .iter()
            .rposition(|n| n.as_ref() == name)
            .ok_or_else(|| SessionError::UnknownCounter(name.to_string()))?;
        let mut next = self.clone();
        next.active.remove(position);
        if let Some(counter) = next.counters.get_mut(name) {
            counter.finished_at = Some(now);
        }
        Ok(next)
    }

    /// Next allowed entry time for a pace point
    #[inline]
    #[must_use]
    pub fn pace_deadline(&self, name: &str) -> Option<Instant> {
        self.pacers.get(name).copied()
    }

    /// Record the next allowed entry time for a pace point
    #[must_use]
    pub fn with_pace_deadline(&self, name: &Arc<str>, deadline: Instant) -> Self {
        let mut next = self.clone();
        next.pacers.insert(Arc::clone(name), deadline);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session::new("test", UserId(1))
    }

    #[test]
    fn set_returns_new_value_and_keeps_original() {
        let original = session();
        let updated = original.set("foo", "FOO").set("bar", 2);

        assert!(!original.contains("foo"));
        assert_eq!(updated.get("foo"), Some(&json!("FOO")));
        assert_eq!(updated.get_as::<u64>("bar").unwrap(), 2);
    }

    #[test]
    fn remove_and_remove_all() {
        let s = session().set_all([("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(s.remove("a").attribute_count(), 2);
        assert_eq!(s.remove_all(["a", "b"]).attribute_count(), 1);
    }

    #[test]
    fn status_transitions() {
        let s = session();
        assert!(!s.is_failed());
        let failed = s.mark_as_failed();
        assert!(failed.is_failed());
        assert!(!failed.mark_as_succeeded().is_failed());
        assert!(!s.is_failed());
    }

    #[test]
    fn get_as_reports_missing_attribute() {
        let err = session().get_as::<String>("nope").unwrap_err();
        assert_eq!(err, EvaluationError::MissingAttribute("nope".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn counters_stack_and_finalize() {
        let name: Arc<str> = Arc::from("i");
        let start = Instant::now();
        let s = session().enter_counter(&name, start).unwrap();
        assert_eq!(s.get_as::<u64>("i").unwrap(), 0);

        let s = s.increment_counter("i").unwrap().increment_counter("i").unwrap();
        assert_eq!(s.get_as::<u64>("i").unwrap(), 2);

        tokio::time::advance(Duration::from_secs(3)).await;
        let s = s.exit_counter("i", Instant::now()).unwrap();
        let counter = s.counter("i").unwrap();
        assert_eq!(counter.iteration, 2);
        assert_eq!(counter.elapsed(Instant::now()), Duration::from_secs(3));
        assert!(!s.is_counter_active("i"));
    }

    #[tokio::test(start_paused = true)]
    async fn nested_reuse_is_rejected_sibling_reuse_is_not() {
        let name: Arc<str> = Arc::from("i");
        let now = Instant::now();
        let s = session().enter_counter(&name, now).unwrap();
        assert_eq!(
            s.enter_counter(&name, now).unwrap_err(),
            SessionError::CounterInUse("i".into())
        );

        let s = s.exit_counter("i", now).unwrap();
        let again = s.enter_counter(&name, now).unwrap();
        assert_eq!(again.counter("i").unwrap().iteration, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_keeps_active_counters() {
        let name: Arc<str> = Arc::from("i");
        let s = session()
            .set("user", "x")
            .enter_counter(&name, Instant::now())
            .unwrap();
        let reset = s.reset();
        assert!(!reset.contains("user"));
        assert!(reset.contains("i"));
    }
}
