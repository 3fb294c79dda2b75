//! Actions
//!
//! One [`Action`] is one control-flow or effect unit inside a chain. Nested
//! chains (branch bodies, loop bodies, retry blocks) are plain [`Chain`]
//! values, so a chain is a tree of actions.
//!
//! Actions are data only. Interpreting them (timing, randomness, feeder
//! pulls, stop handling) is the engine's job.

use crate::chain::Chain;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use volley_core::{RecordSource, Session, Value, ValueSource};

/// Session transformation run by an `Exec` action
///
/// May be asynchronous (e.g. network I/O delegated to a protocol layer). The
/// returned session may be marked failed.
#[async_trait]
pub trait Effect: Send + Sync + fmt::Debug {
    /// Name used in logs
    fn name(&self) -> &str {
        "exec"
    }

    /// Apply the effect
    async fn apply(&self, session: Session) -> Session;
}

/// Synchronous closure effect
pub struct FnEffect<F> {
    name: Arc<str>,
    f: F,
}

impl<F> FnEffect<F>
where
    F: Fn(Session) -> Session + Send + Sync,
{
    /// Wrap a closure
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Effect for FnEffect<F>
where
    F: Fn(Session) -> Session + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, session: Session) -> Session {
        (self.f)(session)
    }
}

impl<F> fmt::Debug for FnEffect<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEffect")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Asynchronous closure effect
pub struct AsyncFnEffect<F> {
    name: Arc<str>,
    f: F,
}

impl<F, Fut> AsyncFnEffect<F>
where
    F: Fn(Session) -> Fut + Send + Sync,
    Fut: Future<Output = Session> + Send,
{
    /// Wrap an async closure
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Effect for AsyncFnEffect<F>
where
    F: Fn(Session) -> Fut + Send + Sync,
    Fut: Future<Output = Session> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, session: Session) -> Session {
        (self.f)(session).await
    }
}

impl<F> fmt::Debug for AsyncFnEffect<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnEffect")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Branch condition
#[derive(Debug, Clone)]
pub enum Condition {
    /// Boolean value source
    Predicate(ValueSource<bool>),
    /// Structural equality of two value sources
    Equals(ValueSource<Value>, ValueSource<Value>),
}

/// One choice of a random switch
#[derive(Debug, Clone)]
pub struct WeightedChoice {
    /// Percentage in `[0, 100]`
    pub weight: f64,
    /// Chain run when chosen
    pub chain: Chain,
}

/// Pace or pause interval
#[derive(Debug, Clone)]
pub enum Interval {
    /// Fixed duration
    Fixed(ValueSource<Duration>),
    /// Uniformly drawn from `[min, max)` on every entry
    Uniform {
        /// Inclusive lower bound
        min: ValueSource<Duration>,
        /// Exclusive upper bound
        max: ValueSource<Duration>,
    },
}

impl Interval {
    /// Fixed interval
    #[inline]
    #[must_use]
    pub fn fixed(duration: impl Into<ValueSource<Duration>>) -> Self {
        Self::Fixed(duration.into())
    }

    /// Random interval in `[min, max)`
    #[inline]
    #[must_use]
    pub fn between(
        min: impl Into<ValueSource<Duration>>,
        max: impl Into<ValueSource<Duration>>,
    ) -> Self {
        Self::Uniform {
            min: min.into(),
            max: max.into(),
        }
    }
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Self::fixed(duration)
    }
}

impl From<&str> for Interval {
    fn from(expression: &str) -> Self {
        Self::fixed(expression)
    }
}

/// What keeps a loop going
#[derive(Debug, Clone)]
pub enum LoopGuard {
    /// Fixed number of iterations, resolved on entry
    Times(ValueSource<u64>),
    /// Checked before every iteration; no condition means always true, no
    /// duration means unbounded
    AsLongAs {
        /// Continue while true
        condition: Option<ValueSource<bool>>,
        /// Stop once the loop has run this long
        duration: Option<ValueSource<Duration>>,
    },
    /// Like `AsLongAs`, but checked after every iteration
    DoWhile {
        /// Continue while true
        condition: ValueSource<bool>,
        /// Stop once the loop has run this long
        duration: Option<ValueSource<Duration>>,
    },
    /// One iteration per element of a sequence resolved on entry
    Foreach {
        /// Sequence to walk
        values: ValueSource<Vec<Value>>,
        /// Attribute receiving the current element
        element: Arc<str>,
    },
    /// Until an exit, an interrupt or the stop signal
    Forever,
}

impl LoopGuard {
    /// Whether the guard can usefully be checked in the middle of a body
    #[must_use]
    pub fn is_interruptible(&self) -> bool {
        matches!(self, Self::AsLongAs { .. } | Self::DoWhile { .. })
    }
}

/// Loop definition
#[derive(Debug, Clone)]
pub struct LoopSpec {
    /// Continuation rule
    pub guard: LoopGuard,
    /// Counter attribute holding the zero-based iteration index
    pub counter: Arc<str>,
    /// Re-check the guard before every action of the body
    pub exit_asap: bool,
    /// Loop body
    pub body: Chain,
}

/// When an exit action fires
#[derive(Debug, Clone)]
pub enum ExitCondition {
    /// Unconditionally
    Always,
    /// When the condition holds
    If(ValueSource<bool>),
    /// When the session is failed
    IfFailed,
}

/// A unit of work in a chain
#[derive(Debug, Clone)]
pub enum Action {
    /// Session transformation
    Exec(Arc<dyn Effect>),
    /// Conditional, with optional else chain
    Branch {
        /// Decides which side runs
        condition: Condition,
        /// Runs when the condition holds
        then: Chain,
        /// Runs otherwise
        or_else: Option<Chain>,
    },
    /// First choice whose key equals the resolved key
    Switch {
        /// Key evaluated once per entry
        key: ValueSource<Value>,
        /// Choices in declaration order
        choices: Arc<[(Value, Chain)]>,
        /// Runs when nothing matches
        or_else: Option<Chain>,
    },
    /// Weighted random choice
    RandomSwitch {
        /// Choices with percentages summing to at most 100
        choices: Arc<[WeightedChoice]>,
        /// Runs for the remaining percentage
        or_else: Option<Chain>,
    },
    /// Loop
    Loop(Arc<LoopSpec>),
    /// Bounded retry block
    TryMax {
        /// Total attempts, at least 1
        attempts: ValueSource<u64>,
        /// Counter attribute holding the zero-based attempt index
        counter: Arc<str>,
        /// Retried chain
        body: Chain,
    },
    /// Abandon the chain at the first failure
    ExitBlockOnFail(Chain),
    /// Minimum spacing between entries
    Pace {
        /// Target interval
        interval: Interval,
        /// Pace point name
        counter: Arc<str>,
    },
    /// Plain suspension
    Pause(Interval),
    /// Merge one record into the session
    Feed(Arc<dyn RecordSource>),
    /// Leave the innermost enclosing block
    Exit(ExitCondition),
    /// Abort the whole run for every user
    StopInjector(ValueSource<String>),
}

impl Action {
    /// Short label for logs and reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exec(_) => "exec",
            Self::Branch { .. } => "branch",
            Self::Switch { .. } => "switch",
            Self::RandomSwitch { .. } => "random_switch",
            Self::Loop(_) => "loop",
            Self::TryMax { .. } => "try_max",
            Self::ExitBlockOnFail(_) => "exit_block_on_fail",
            Self::Pace { .. } => "pace",
            Self::Pause(_) => "pause",
            Self::Feed(_) => "feed",
            Self::Exit(_) => "exit",
            Self::StopInjector(_) => "stop_injector",
        }
    }

    /// Nested chains, in declaration order
    #[must_use]
    pub fn children(&self) -> Vec<&Chain> {
        match self {
            Self::Branch { then, or_else, .. } => std::iter::once(then).chain(or_else).collect(),
            Self::Switch {
                choices, or_else, ..
            } => choices
                .iter()
                .map(|(_, chain)| chain)
                .chain(or_else)
                .collect(),
            Self::RandomSwitch { choices, or_else } => choices
                .iter()
                .map(|choice| &choice.chain)
                .chain(or_else)
                .collect(),
            Self::Loop(spec) => vec![&spec.body],
            Self::TryMax { body, .. } | Self::ExitBlockOnFail(body) => vec![body],
            Self::Exec(_)
            | Self::Pace { .. }
            | Self::Pause(_)
            | Self::Feed(_)
            | Self::Exit(_)
            | Self::StopInjector(_) => Vec::new(),
        }
    }

    /// Counter this action pushes onto the session's scope stack, if any
    #[must_use]
    pub fn scope_counter(&self) -> Option<&Arc<str>> {
        match self {
            Self::Loop(spec) => Some(&spec.counter),
            Self::TryMax { counter, .. } => Some(counter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::UserId;

    #[tokio::test]
    async fn closure_effects_apply() {
        let sync = FnEffect::new("set", |s: Session| s.set("a", 1));
        let asynchronous = AsyncFnEffect::new("later", |s: Session| async move { s.set("b", 2) });

        let session = Session::new("s", UserId(0));
        let session = sync.apply(session).await;
        let session = asynchronous.apply(session).await;

        assert!(session.contains("a"));
        assert!(session.contains("b"));
        assert_eq!(sync.name(), "set");
        assert_eq!(asynchronous.name(), "later");
    }

    #[test]
    fn children_cover_every_nested_chain() {
        let action = Action::Branch {
            condition: Condition::Predicate(true.into()),
            then: Chain::new().exit_here(),
            or_else: Some(Chain::new()),
        };
        assert_eq!(action.children().len(), 2);
        assert_eq!(Action::Pause(Duration::from_secs(1).into()).children().len(), 0);
    }
}
