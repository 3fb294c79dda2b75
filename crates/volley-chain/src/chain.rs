//! Chains and their builders
//!
//! A [`Chain`] is an immutable, persistent sequence of [`Action`]s. It is its
//! own builder: every method takes `&self` and returns a new chain sharing
//! structure with the old one, so a chain definition can be reused and
//! extended freely, and shared across any number of virtual users.
//!
//! Control-flow blocks are opened on the parent chain and closed by a
//! terminal call (`then`, `on`, `or_else`) that hands back the parent with the
//! block appended. Blocks with structural constraints validate them on
//! close, returning [`ConstructionError`].
//!
//! ```rust
//! use std::time::Duration;
//! use volley_chain::Chain;
//!
//! let chain = Chain::new()
//!     .do_if("#{x} == 1")
//!     .then(Chain::new().exec(|s| s.set("hit", true)))
//!     .pace(Duration::from_secs(5));
//! assert_eq!(chain.len(), 2);
//! ```

use crate::action::{
    Action, AsyncFnEffect, Condition, Effect, ExitCondition, FnEffect, Interval, LoopGuard,
    LoopSpec, WeightedChoice,
};
use crate::counter::{auto_name, CounterKind};
use crate::error::ConstructionError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use volley_core::{RecordSource, Session, Value, ValueSource};

/// Tolerance when comparing summed percentages
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Immutable sequence of actions
#[derive(Debug, Clone, Default)]
pub struct Chain {
    actions: im::Vector<Action>,
}

/// Chains are built by chaining calls on [`Chain`] itself
pub type ChainBuilder = Chain;

impl Chain {
    /// Empty chain
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of top-level actions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the chain has no actions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Top-level actions in order
    pub fn actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.actions.iter()
    }

    /// Action at `index`
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    /// Append one action
    #[must_use]
    pub fn push(&self, action: Action) -> Self {
        let mut next = self.clone();
        next.actions.push_back(action);
        next
    }

    /// Append every action of another chain
    #[must_use]
    pub fn append(&self, other: Chain) -> Self {
        let mut next = self.clone();
        next.actions.append(other.actions);
        next
    }

    /// Append a synchronous session transformation
    #[must_use]
    pub fn exec<F>(&self, f: F) -> Self
    where
        F: Fn(Session) -> Session + Send + Sync + 'static,
    {
        self.exec_named("exec", f)
    }

    /// Append a named synchronous session transformation
    #[must_use]
    pub fn exec_named<F>(&self, name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Session) -> Session + Send + Sync + 'static,
    {
        self.exec_effect(Arc::new(FnEffect::new(name, f)))
    }

    /// Append an asynchronous session transformation
    #[must_use]
    pub fn exec_async<F, Fut>(&self, f: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Session> + Send + 'static,
    {
        self.exec_effect(Arc::new(AsyncFnEffect::new("exec", f)))
    }

    /// Append an arbitrary effect
    #[must_use]
    pub fn exec_effect(&self, effect: Arc<dyn Effect>) -> Self {
        self.push(Action::Exec(effect))
    }

    /// Open a conditional block
    #[must_use]
    pub fn do_if(&self, condition: impl Into<ValueSource<bool>>) -> DoIf {
        DoIf {
            parent: self.clone(),
            condition: Condition::Predicate(condition.into()),
        }
    }

    /// Open a conditional block on the equality of two values
    #[must_use]
    pub fn do_if_equals(
        &self,
        actual: impl Into<ValueSource<Value>>,
        expected: impl Into<ValueSource<Value>>,
    ) -> DoIf {
        DoIf {
            parent: self.clone(),
            condition: Condition::Equals(actual.into(), expected.into()),
        }
    }

    /// Open a two-sided conditional block
    #[must_use]
    pub fn do_if_or_else(&self, condition: impl Into<ValueSource<bool>>) -> DoIfOrElse {
        DoIfOrElse {
            parent: self.clone(),
            condition: Condition::Predicate(condition.into()),
        }
    }

    /// Open a two-sided conditional block on the equality of two values
    #[must_use]
    pub fn do_if_equals_or_else(
        &self,
        actual: impl Into<ValueSource<Value>>,
        expected: impl Into<ValueSource<Value>>,
    ) -> DoIfOrElse {
        DoIfOrElse {
            parent: self.clone(),
            condition: Condition::Equals(actual.into(), expected.into()),
        }
    }

    /// Open a switch on a key
    #[must_use]
    pub fn do_switch(&self, key: impl Into<ValueSource<Value>>) -> DoSwitch {
        DoSwitch {
            parent: self.clone(),
            key: key.into(),
        }
    }

    /// Open a switch with a fallback chain
    #[must_use]
    pub fn do_switch_or_else(&self, key: impl Into<ValueSource<Value>>) -> DoSwitchOrElse {
        DoSwitchOrElse {
            parent: self.clone(),
            key: key.into(),
        }
    }

    /// Open a percentage-weighted random switch
    #[must_use]
    pub fn random_switch(&self) -> RandomSwitch {
        RandomSwitch {
            parent: self.clone(),
        }
    }

    /// Open a percentage-weighted random switch with a fallback chain
    #[must_use]
    pub fn random_switch_or_else(&self) -> RandomSwitchOrElse {
        RandomSwitchOrElse {
            parent: self.clone(),
        }
    }

    /// Open a random switch where every choice is equally likely
    #[must_use]
    pub fn uniform_random_switch(&self) -> UniformRandomSwitch {
        UniformRandomSwitch {
            parent: self.clone(),
        }
    }

    /// Loop a fixed number of times
    #[must_use]
    pub fn repeat(&self, times: impl Into<ValueSource<u64>>) -> LoopBuilder {
        self.open_loop(LoopGuard::Times(times.into()), false)
    }

    /// Loop for a duration
    #[must_use]
    pub fn during(&self, duration: impl Into<ValueSource<Duration>>) -> LoopBuilder {
        self.open_loop(
            LoopGuard::AsLongAs {
                condition: None,
                duration: Some(duration.into()),
            },
            true,
        )
    }

    /// Loop while a condition holds, checked before each iteration
    #[must_use]
    pub fn as_long_as(&self, condition: impl Into<ValueSource<bool>>) -> LoopBuilder {
        self.open_loop(
            LoopGuard::AsLongAs {
                condition: Some(condition.into()),
                duration: None,
            },
            false,
        )
    }

    /// Loop while a condition holds and a duration has not elapsed
    #[must_use]
    pub fn as_long_as_during(
        &self,
        condition: impl Into<ValueSource<bool>>,
        duration: impl Into<ValueSource<Duration>>,
    ) -> LoopBuilder {
        self.open_loop(
            LoopGuard::AsLongAs {
                condition: Some(condition.into()),
                duration: Some(duration.into()),
            },
            true,
        )
    }

    /// Loop while a condition holds, checked after each iteration
    #[must_use]
    pub fn do_while(&self, condition: impl Into<ValueSource<bool>>) -> LoopBuilder {
        self.open_loop(
            LoopGuard::DoWhile {
                condition: condition.into(),
                duration: None,
            },
            false,
        )
    }

    /// `do_while` bounded by a duration
    #[must_use]
    pub fn do_while_during(
        &self,
        condition: impl Into<ValueSource<bool>>,
        duration: impl Into<ValueSource<Duration>>,
    ) -> LoopBuilder {
        self.open_loop(
            LoopGuard::DoWhile {
                condition: condition.into(),
                duration: Some(duration.into()),
            },
            true,
        )
    }

    /// Loop over a sequence, exposing each element as an attribute
    #[must_use]
    pub fn foreach(
        &self,
        values: impl Into<ValueSource<Vec<Value>>>,
        element: impl Into<Arc<str>>,
    ) -> LoopBuilder {
        self.open_loop(
            LoopGuard::Foreach {
                values: values.into(),
                element: element.into(),
            },
            false,
        )
    }

    /// Loop until exited
    #[must_use]
    pub fn forever(&self) -> LoopBuilder {
        self.open_loop(LoopGuard::Forever, false)
    }

    fn open_loop(&self, guard: LoopGuard, exit_asap: bool) -> LoopBuilder {
        LoopBuilder {
            parent: self.clone(),
            guard,
            counter: None,
            exit_asap,
        }
    }

    /// Open a retry block
    #[must_use]
    pub fn try_max(&self, attempts: impl Into<ValueSource<u64>>) -> TryMax {
        TryMax {
            parent: self.clone(),
            attempts: attempts.into(),
            counter: None,
        }
    }

    /// Run `body` once, abandoning it at the first failure
    #[must_use]
    pub fn exit_block_on_fail(&self, body: Chain) -> Self {
        self.push(Action::ExitBlockOnFail(body))
    }

    /// Leave the innermost enclosing block
    #[must_use]
    pub fn exit_here(&self) -> Self {
        self.push(Action::Exit(ExitCondition::Always))
    }

    /// Leave the innermost enclosing block when the condition holds
    #[must_use]
    pub fn exit_here_if(&self, condition: impl Into<ValueSource<bool>>) -> Self {
        self.push(Action::Exit(ExitCondition::If(condition.into())))
    }

    /// Leave the innermost enclosing block when the session is failed
    #[must_use]
    pub fn exit_here_if_failed(&self) -> Self {
        self.push(Action::Exit(ExitCondition::IfFailed))
    }

    /// Enforce a minimum spacing between entries into this point
    #[must_use]
    pub fn pace(&self, interval: impl Into<Interval>) -> Self {
        self.pace_with_counter(interval, auto_name(CounterKind::Pace))
    }

    /// `pace` with an explicit pace point name
    #[must_use]
    pub fn pace_with_counter(
        &self,
        interval: impl Into<Interval>,
        counter: impl Into<Arc<str>>,
    ) -> Self {
        self.push(Action::Pace {
            interval: interval.into(),
            counter: counter.into(),
        })
    }

    /// Suspend the user
    #[must_use]
    pub fn pause(&self, interval: impl Into<Interval>) -> Self {
        self.push(Action::Pause(interval.into()))
    }

    /// Suspend the user for a random duration in `[min, max)`
    #[must_use]
    pub fn pause_between(
        &self,
        min: impl Into<ValueSource<Duration>>,
        max: impl Into<ValueSource<Duration>>,
    ) -> Self {
        self.pause(Interval::between(min, max))
    }

    /// Merge one record from `source` into the session
    #[must_use]
    pub fn feed(&self, source: Arc<dyn RecordSource>) -> Self {
        self.push(Action::Feed(source))
    }

    /// Abort the whole run
    #[must_use]
    pub fn stop_injector(&self, message: impl Into<ValueSource<String>>) -> Self {
        self.push(Action::StopInjector(message.into()))
    }
}

/// Whether `chain`, at any depth, holds a block that pushes `name`
fn uses_scope_counter(chain: &Chain, name: &str) -> bool {
    chain.actions().any(|action| {
        action
            .scope_counter()
            .is_some_and(|counter| counter.as_ref() == name)
            || action
                .children()
                .into_iter()
                .any(|child| uses_scope_counter(child, name))
    })
}

fn check_counter(counter: &Arc<str>, body: &Chain) -> Result<(), ConstructionError> {
    if uses_scope_counter(body, counter) {
        return Err(ConstructionError::CounterReuse(counter.to_string()));
    }
    Ok(())
}

fn weighted_choices(
    choices: impl IntoIterator<Item = (f64, Chain)>,
) -> Result<Arc<[WeightedChoice]>, ConstructionError> {
    let choices: Vec<WeightedChoice> = choices
        .into_iter()
        .map(|(weight, chain)| WeightedChoice { weight, chain })
        .collect();
    if choices.is_empty() {
        return Err(ConstructionError::EmptyRandomSwitch);
    }
    if let Some(bad) = choices
        .iter()
        .find(|c| !c.weight.is_finite() || c.weight < 0.0)
    {
        return Err(ConstructionError::InvalidWeight(bad.weight));
    }
    let total: f64 = choices.iter().map(|c| c.weight).sum();
    if total > 100.0 + WEIGHT_EPSILON {
        return Err(ConstructionError::WeightsExceed100 { total });
    }
    Ok(choices.into())
}

fn switch_choices<K: Into<Value>>(
    choices: impl IntoIterator<Item = (K, Chain)>,
) -> Result<Arc<[(Value, Chain)]>, ConstructionError> {
    let choices: Vec<(Value, Chain)> = choices
        .into_iter()
        .map(|(key, chain)| (key.into(), chain))
        .collect();
    if choices.is_empty() {
        return Err(ConstructionError::EmptySwitch);
    }
    Ok(choices.into())
}

/// Open `do_if` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoIf {
    parent: Chain,
    condition: Condition,
}

impl DoIf {
    /// Close with the conditional body
    pub fn then(self, then: Chain) -> Chain {
        self.parent.push(Action::Branch {
            condition: self.condition,
            then,
            or_else: None,
        })
    }
}

/// Open `do_if_or_else` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoIfOrElse {
    parent: Chain,
    condition: Condition,
}

impl DoIfOrElse {
    /// Provide the body run when the condition holds
    pub fn then(self, then: Chain) -> DoIfOrElseThen {
        DoIfOrElseThen {
            parent: self.parent,
            condition: self.condition,
            then,
        }
    }
}

/// `do_if_or_else` waiting for its else body
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoIfOrElseThen {
    parent: Chain,
    condition: Condition,
    then: Chain,
}

impl DoIfOrElseThen {
    /// Close with the body run when the condition does not hold
    pub fn or_else(self, or_else: Chain) -> Chain {
        self.parent.push(Action::Branch {
            condition: self.condition,
            then: self.then,
            or_else: Some(or_else),
        })
    }
}

/// Open `do_switch` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoSwitch {
    parent: Chain,
    key: ValueSource<Value>,
}

impl DoSwitch {
    /// Close with the choices, matched in the given order
    ///
    /// # Errors
    /// `ConstructionError::EmptySwitch` if there are no choices
    pub fn on<K: Into<Value>>(
        self,
        choices: impl IntoIterator<Item = (K, Chain)>,
    ) -> Result<Chain, ConstructionError> {
        Ok(self.parent.push(Action::Switch {
            key: self.key,
            choices: switch_choices(choices)?,
            or_else: None,
        }))
    }
}

/// Open `do_switch_or_else` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoSwitchOrElse {
    parent: Chain,
    key: ValueSource<Value>,
}

impl DoSwitchOrElse {
    /// Provide the choices, matched in the given order
    ///
    /// # Errors
    /// `ConstructionError::EmptySwitch` if there are no choices
    pub fn on<K: Into<Value>>(
        self,
        choices: impl IntoIterator<Item = (K, Chain)>,
    ) -> Result<DoSwitchOrElseOn, ConstructionError> {
        Ok(DoSwitchOrElseOn {
            parent: self.parent,
            key: self.key,
            choices: switch_choices(choices)?,
        })
    }
}

/// `do_switch_or_else` waiting for its fallback
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct DoSwitchOrElseOn {
    parent: Chain,
    key: ValueSource<Value>,
    choices: Arc<[(Value, Chain)]>,
}

impl DoSwitchOrElseOn {
    /// Close with the chain run when no key matches
    pub fn or_else(self, or_else: Chain) -> Chain {
        self.parent.push(Action::Switch {
            key: self.key,
            choices: self.choices,
            or_else: Some(or_else),
        })
    }
}

/// Open `random_switch` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct RandomSwitch {
    parent: Chain,
}

impl RandomSwitch {
    /// Close with `(percentage, chain)` choices; the remainder up to 100% runs
    /// nothing
    ///
    /// # Errors
    /// - `ConstructionError::EmptyRandomSwitch` if there are no choices
    /// - `ConstructionError::InvalidWeight` for a negative or non-finite weight
    /// - `ConstructionError::WeightsExceed100` if the weights sum past 100
    pub fn on(
        self,
        choices: impl IntoIterator<Item = (f64, Chain)>,
    ) -> Result<Chain, ConstructionError> {
        Ok(self.parent.push(Action::RandomSwitch {
            choices: weighted_choices(choices)?,
            or_else: None,
        }))
    }
}

/// Open `random_switch_or_else` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct RandomSwitchOrElse {
    parent: Chain,
}

impl RandomSwitchOrElse {
    /// Provide `(percentage, chain)` choices
    ///
    /// # Errors
    /// Same as [`RandomSwitch::on`]
    pub fn on(
        self,
        choices: impl IntoIterator<Item = (f64, Chain)>,
    ) -> Result<RandomSwitchOrElseOn, ConstructionError> {
        Ok(RandomSwitchOrElseOn {
            parent: self.parent,
            choices: weighted_choices(choices)?,
        })
    }
}

/// `random_switch_or_else` waiting for its fallback
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct RandomSwitchOrElseOn {
    parent: Chain,
    choices: Arc<[WeightedChoice]>,
}

impl RandomSwitchOrElseOn {
    /// Close with the chain run for the remaining percentage
    pub fn or_else(self, or_else: Chain) -> Chain {
        self.parent.push(Action::RandomSwitch {
            choices: self.choices,
            or_else: Some(or_else),
        })
    }
}

/// Open `uniform_random_switch` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct UniformRandomSwitch {
    parent: Chain,
}

impl UniformRandomSwitch {
    /// Close with equally likely choices
    ///
    /// # Errors
    /// `ConstructionError::EmptyRandomSwitch` if there are no choices
    pub fn on(self, choices: impl IntoIterator<Item = Chain>) -> Result<Chain, ConstructionError> {
        let chains: Vec<Chain> = choices.into_iter().collect();
        if chains.is_empty() {
            return Err(ConstructionError::EmptyRandomSwitch);
        }
        #[allow(clippy::cast_precision_loss)]
        let weight = 100.0 / chains.len() as f64;
        RandomSwitch {
            parent: self.parent,
        }
        .on(chains.into_iter().map(|chain| (weight, chain)))
    }
}

/// Open loop block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct LoopBuilder {
    parent: Chain,
    guard: LoopGuard,
    counter: Option<Arc<str>>,
    exit_asap: bool,
}

impl LoopBuilder {
    /// Name the counter attribute instead of generating one
    pub fn counter_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.counter = Some(name.into());
        self
    }

    /// Check the guard before every action of the body, not just between
    /// iterations. Only meaningful for condition and duration guards.
    pub fn exit_asap(mut self, exit_asap: bool) -> Self {
        self.exit_asap = exit_asap;
        self
    }

    /// Close with the loop body
    ///
    /// # Errors
    /// `ConstructionError::CounterReuse` if a block nested in `body` uses the
    /// same counter name
    pub fn on(self, body: Chain) -> Result<Chain, ConstructionError> {
        let counter = self
            .counter
            .unwrap_or_else(|| auto_name(CounterKind::Loop));
        check_counter(&counter, &body)?;
        let exit_asap = self.exit_asap && self.guard.is_interruptible();
        Ok(self.parent.push(Action::Loop(Arc::new(LoopSpec {
            guard: self.guard,
            counter,
            exit_asap,
            body,
        }))))
    }
}

/// Open `try_max` block
#[derive(Debug, Clone)]
#[must_use = "a block does nothing until it is closed"]
pub struct TryMax {
    parent: Chain,
    attempts: ValueSource<u64>,
    counter: Option<Arc<str>>,
}

impl TryMax {
    /// Name the attempt counter instead of generating one
    pub fn counter_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.counter = Some(name.into());
        self
    }

    /// Close with the retried chain
    ///
    /// # Errors
    /// - `ConstructionError::ZeroAttempts` for a constant attempt count of 0
    /// - `ConstructionError::CounterReuse` if a nested block uses the same
    ///   counter name
    pub fn on(self, body: Chain) -> Result<Chain, ConstructionError> {
        if self.attempts.as_constant() == Some(&0) {
            return Err(ConstructionError::ZeroAttempts);
        }
        let counter = self.counter.unwrap_or_else(|| auto_name(CounterKind::Try));
        check_counter(&counter, &body)?;
        Ok(self.parent.push(Action::TryMax {
            attempts: self.attempts,
            counter,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(chain: &Chain) -> Vec<&'static str> {
        chain.actions().map(Action::kind).collect()
    }

    #[test]
    fn builder_calls_leave_the_original_untouched() {
        let base = Chain::new().exec(|s| s);
        let extended = base.pause(Duration::from_secs(1));
        assert_eq!(base.len(), 1);
        assert_eq!(kinds(&extended), vec!["exec", "pause"]);
    }

    #[test]
    fn blocks_return_the_parent_chain() {
        let chain = Chain::new()
            .do_if("#{x} == 1")
            .then(Chain::new().exec(|s| s))
            .do_if_or_else(true)
            .then(Chain::new())
            .or_else(Chain::new().exit_here())
            .exit_here_if_failed();
        assert_eq!(kinds(&chain), vec!["branch", "branch", "exit"]);
    }

    #[test]
    fn empty_switches_fail_construction() {
        let none: Vec<(Value, Chain)> = Vec::new();
        assert_eq!(
            Chain::new().do_switch("#{k}").on(none).unwrap_err(),
            ConstructionError::EmptySwitch
        );
        assert_eq!(
            Chain::new()
                .uniform_random_switch()
                .on(Vec::new())
                .unwrap_err(),
            ConstructionError::EmptyRandomSwitch
        );
    }

    #[test]
    fn switch_preserves_declaration_order() {
        let chain = Chain::new()
            .do_switch("#{k}")
            .on([("b", Chain::new()), ("a", Chain::new()), ("c", Chain::new())])
            .unwrap();
        let Some(Action::Switch { choices, .. }) = chain.get(0) else {
            panic!("expected a switch");
        };
        let keys: Vec<&Value> = choices.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn random_switch_weights_are_validated() {
        let err = Chain::new()
            .random_switch()
            .on([(60.0, Chain::new()), (50.0, Chain::new())])
            .unwrap_err();
        assert!(matches!(err, ConstructionError::WeightsExceed100 { .. }));

        let err = Chain::new()
            .random_switch()
            .on([(-1.0, Chain::new())])
            .unwrap_err();
        assert_eq!(err, ConstructionError::InvalidWeight(-1.0));

        assert!(Chain::new()
            .random_switch_or_else()
            .on([(30.0, Chain::new())])
            .map(|open| open.or_else(Chain::new()))
            .is_ok());
    }

    #[test]
    fn uniform_switch_splits_evenly() {
        let chain = Chain::new()
            .uniform_random_switch()
            .on([Chain::new(), Chain::new(), Chain::new()])
            .unwrap();
        let Some(Action::RandomSwitch { choices, or_else }) = chain.get(0) else {
            panic!("expected a random switch");
        };
        assert!(or_else.is_none());
        let total: f64 = choices.iter().map(|c| c.weight).sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn zero_attempts_fail_construction() {
        assert_eq!(
            Chain::new().try_max(0u64).on(Chain::new()).unwrap_err(),
            ConstructionError::ZeroAttempts
        );
        assert!(Chain::new().try_max("#{n}").on(Chain::new()).is_ok());
    }

    #[test]
    fn nested_counter_reuse_fails_sibling_reuse_does_not() {
        let inner = Chain::new()
            .repeat(2u64)
            .counter_name("i")
            .on(Chain::new())
            .unwrap();

        let nested = Chain::new()
            .repeat(2u64)
            .counter_name("i")
            .on(Chain::new().do_if(true).then(inner.clone()));
        assert_eq!(
            nested.unwrap_err(),
            ConstructionError::CounterReuse("i".into())
        );

        let siblings = inner
            .repeat(3u64)
            .counter_name("i")
            .on(Chain::new())
            .unwrap();
        assert_eq!(siblings.len(), 2);
    }

    #[test]
    fn auto_counters_never_collide_when_nested() {
        let inner = Chain::new().forever().on(Chain::new().exit_here()).unwrap();
        let outer = Chain::new().forever().on(inner).unwrap();
        assert_eq!(outer.len(), 1);
    }

    #[test]
    fn exit_asap_only_sticks_to_interruptible_guards() {
        let chain = Chain::new()
            .repeat(3u64)
            .exit_asap(true)
            .on(Chain::new())
            .unwrap()
            .during(Duration::from_secs(1))
            .on(Chain::new())
            .unwrap();
        let flags: Vec<bool> = chain
            .actions()
            .map(|a| match a {
                Action::Loop(spec) => spec.exit_asap,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(flags, vec![false, true]);
    }
}
