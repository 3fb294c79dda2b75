//! Virtual user interpreter
//!
//! A [`VirtualUser`] walks its scenario's chain depth first, threading one
//! [`Session`] value through every action. Block actions (loops, retries,
//! `exit_block_on_fail`) push a frame that nested actions can target:
//! - an exit ends the innermost frame
//! - a failed session ends the innermost retry or exit-on-fail frame
//! - an `exit_asap` loop whose guard stops holding ends that loop
//!
//! Each of these travels back up as an interrupt until the frame with the
//! matching id catches it. The global stop signal is checked before every
//! action and raced against every suspension.

use crate::clock::Clock;
use crate::stop::{StopReason, StopSignal};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use volley_chain::{
    Action, Chain, Condition, ExitCondition, Interval, LoopGuard, LoopSpec, Scenario,
    WeightedChoice, WEIGHT_EPSILON,
};
use volley_core::{
    values_equal, EvaluationError, ExpressionEngine, RecordSource, Session, UserId, Value,
    ValueSource,
};

/// How a user's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Reached the end of the top-level chain
    Completed,
    /// An exit action left the top-level chain
    Exited,
    /// The global stop signal ended the run
    Stopped,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Exited => "exited",
            Self::Stopped => "stopped",
        })
    }
}

/// Final state of one virtual user
#[derive(Debug, Clone)]
pub struct UserOutcome {
    /// Session as it left the chain
    pub session: Session,
    /// How the run ended
    pub termination: Termination,
}

impl UserOutcome {
    /// Whether the session ended failed
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.session.is_failed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Exit,
    Failure,
    Guard,
}

enum Flow {
    Next(Session),
    Interrupt {
        session: Session,
        scope: usize,
        cause: Cause,
    },
    Exit(Session),
    Stopped(Session),
}

impl Flow {
    fn map_session(self, f: impl FnOnce(Session) -> Session) -> Self {
        match self {
            Self::Next(s) => Self::Next(f(s)),
            Self::Interrupt {
                session,
                scope,
                cause,
            } => Self::Interrupt {
                session: f(session),
                scope,
                cause,
            },
            Self::Exit(s) => Self::Exit(f(s)),
            Self::Stopped(s) => Self::Stopped(f(s)),
        }
    }
}

enum FrameKind<'a> {
    Loop { spec: &'a LoopSpec, started: Instant },
    Try,
    ExitOnFail,
}

struct Frame<'a> {
    id: usize,
    kind: FrameKind<'a>,
    parent: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    fn new(kind: FrameKind<'a>, parent: Option<&'a Frame<'a>>) -> Self {
        Self {
            id: parent.map_or(0, |p| p.id + 1),
            kind,
            parent,
        }
    }

    /// This frame and its ancestors, innermost first
    fn ancestry(&'a self) -> impl Iterator<Item = &'a Frame<'a>> {
        std::iter::successors(Some(self), |frame| frame.parent)
    }
}

/// Loop bound fixed on entry
enum Plan {
    Times(u64),
    Each(Vec<Value>),
    Guarded,
}

/// One virtual user bound to a scenario
pub struct VirtualUser {
    user_id: UserId,
    scenario: Scenario,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    rng: Mutex<StdRng>,
}

impl VirtualUser {
    /// Bind a user to a scenario. With a seed, the user's random choices are
    /// reproducible and independent of other users' seeds.
    #[must_use]
    pub fn new(
        user_id: UserId,
        scenario: Scenario,
        clock: Arc<dyn Clock>,
        stop: StopSignal,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => {
                StdRng::seed_from_u64(seed ^ user_id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_os_rng(),
        };
        Self {
            user_id,
            scenario,
            clock,
            stop,
            rng: Mutex::new(rng),
        }
    }

    /// User identifier
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Run the scenario from an empty session
    pub async fn run(self) -> UserOutcome {
        let session = Session::new(self.scenario.name_arc(), self.user_id);
        self.run_with(session).await
    }

    /// Run the scenario from a prepared session
    pub async fn run_with(&self, session: Session) -> UserOutcome {
        tracing::debug!("user started");
        let flow = self.run_chain(self.scenario.chain(), session, None).await;
        let outcome = match flow {
            Flow::Next(session) => UserOutcome {
                session,
                termination: Termination::Completed,
            },
            Flow::Interrupt { session, .. } | Flow::Exit(session) => UserOutcome {
                session,
                termination: Termination::Exited,
            },
            Flow::Stopped(session) => UserOutcome {
                session,
                termination: Termination::Stopped,
            },
        };
        tracing::debug!(
            termination = %outcome.termination,
            failed = outcome.is_failed(),
            "user finished"
        );
        outcome
    }

    fn expressions(&self) -> &dyn ExpressionEngine {
        self.scenario.expressions()
    }

    fn resolve<V: volley_core::FromValue + Clone>(
        &self,
        source: &ValueSource<V>,
        session: &Session,
    ) -> Result<V, EvaluationError> {
        source.resolve(session, self.expressions())
    }

    fn fail(session: Session, action: &str, error: &dyn fmt::Display) -> Session {
        tracing::warn!(action, error = %error, "session marked as failed");
        session.mark_as_failed()
    }

    fn leave(session: Session, counter: &str, now: Instant) -> Session {
        match session.exit_counter(counter, now) {
            Ok(left) => left,
            Err(_) => session,
        }
    }

    fn deadline(from: Instant, duration: Duration) -> Result<Instant, EvaluationError> {
        from.checked_add(duration)
            .ok_or_else(|| EvaluationError::TypeMismatch {
                expected: "duration within the clock's range",
                found: format!("{duration:?}"),
            })
    }

    /// Sleep until `deadline`; `false` if the stop signal cut it short
    async fn sleep_until(&self, deadline: Instant) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        tokio::select! {
            () = self.clock.sleep_until(deadline) => true,
            () = self.stop.stopped() => false,
        }
    }

    fn run_chain<'a>(
        &'a self,
        chain: &'a Chain,
        session: Session,
        scope: Option<&'a Frame<'a>>,
    ) -> BoxFuture<'a, Flow> {
        async move {
            let mut session = session;
            for action in chain.actions() {
                session = match self.checkpoint(session, scope) {
                    Ok(session) => session,
                    Err(flow) => return flow,
                };
                match self.run_action(action, session, scope).await {
                    Flow::Next(next) => session = next,
                    other => return other,
                }
            }
            Flow::Next(session)
        }
        .boxed()
    }

    /// Checks run before every action
    fn checkpoint(&self, session: Session, scope: Option<&Frame<'_>>) -> Result<Session, Flow> {
        if self.stop.is_stopped() {
            return Err(Flow::Stopped(session));
        }

        let Some(scope) = scope else {
            return Ok(session);
        };

        if let Some((id, error)) = self.lapsed_loop(scope, &session) {
            let session = match error {
                Some(e) => Self::fail(session, "loop", &e),
                None => session,
            };
            return Err(Flow::Interrupt {
                session,
                scope: id,
                cause: Cause::Guard,
            });
        }

        if session.is_failed() {
            let catcher = scope
                .ancestry()
                .find(|frame| matches!(frame.kind, FrameKind::Try | FrameKind::ExitOnFail));
            if let Some(frame) = catcher {
                return Err(Flow::Interrupt {
                    session,
                    scope: frame.id,
                    cause: Cause::Failure,
                });
            }
        }
        Ok(session)
    }

    /// Outermost `exit_asap` loop whose guard no longer holds
    fn lapsed_loop(
        &self,
        frame: &Frame<'_>,
        session: &Session,
    ) -> Option<(usize, Option<EvaluationError>)> {
        if let Some(outer) = frame.parent.and_then(|p| self.lapsed_loop(p, session)) {
            return Some(outer);
        }
        let FrameKind::Loop { spec, started } = frame.kind else {
            return None;
        };
        if !spec.exit_asap {
            return None;
        }
        // a do-while body always gets its first pass, only the time limit applies
        let first_pass = matches!(spec.guard, LoopGuard::DoWhile { .. })
            && session
                .counter(spec.counter.as_ref())
                .map_or(0, |c| c.iteration)
                == 0;
        match self.guard_holds(&spec.guard, started, session, !first_pass) {
            Ok(true) => None,
            Ok(false) => Some((frame.id, None)),
            Err(e) => Some((frame.id, Some(e))),
        }
    }

    fn run_action<'a>(
        &'a self,
        action: &'a Action,
        session: Session,
        scope: Option<&'a Frame<'a>>,
    ) -> BoxFuture<'a, Flow> {
        async move {
            match action {
                Action::Exec(effect) => {
                    tracing::trace!(effect = effect.name(), "exec");
                    Flow::Next(effect.apply(session).await)
                }
                Action::Branch {
                    condition,
                    then,
                    or_else,
                } => match self.condition_holds(condition, &session) {
                    Ok(true) => self.run_chain(then, session, scope).await,
                    Ok(false) => match or_else {
                        Some(chain) => self.run_chain(chain, session, scope).await,
                        None => Flow::Next(session),
                    },
                    Err(e) => Flow::Next(Self::fail(session, action.kind(), &e)),
                },
                Action::Switch {
                    key,
                    choices,
                    or_else,
                } => match self.resolve(key, &session) {
                    Ok(key) => {
                        let chosen = choices
                            .iter()
                            .find(|(choice, _)| values_equal(&key, choice))
                            .map(|(_, chain)| chain)
                            .or(or_else.as_ref());
                        match chosen {
                            Some(chain) => self.run_chain(chain, session, scope).await,
                            None => Flow::Next(session),
                        }
                    }
                    Err(e) => Flow::Next(Self::fail(session, action.kind(), &e)),
                },
                Action::RandomSwitch { choices, or_else } => {
                    match self.pick(choices).or(or_else.as_ref()) {
                        Some(chain) => self.run_chain(chain, session, scope).await,
                        None => Flow::Next(session),
                    }
                }
                Action::Loop(spec) => self.run_loop(spec, session, scope).await,
                Action::TryMax {
                    attempts,
                    counter,
                    body,
                } => self.run_try(attempts, counter, body, session, scope).await,
                Action::ExitBlockOnFail(body) => {
                    let frame = Frame::new(FrameKind::ExitOnFail, scope);
                    match self.run_chain(body, session, Some(&frame)).await {
                        Flow::Interrupt { session, scope, .. } if scope == frame.id => {
                            Flow::Next(session)
                        }
                        other => other,
                    }
                }
                Action::Pace { interval, counter } => {
                    self.run_pace(interval, counter, session).await
                }
                Action::Pause(interval) => match self
                    .draw_interval(interval, &session)
                    .and_then(|duration| Self::deadline(self.clock.now(), duration))
                {
                    Ok(deadline) => {
                        if self.sleep_until(deadline).await {
                            Flow::Next(session)
                        } else {
                            Flow::Stopped(session)
                        }
                    }
                    Err(e) => Flow::Next(Self::fail(session, action.kind(), &e)),
                },
                Action::Feed(source) => Flow::Next(Self::feed(source.as_ref(), session)),
                Action::Exit(condition) => {
                    let exit = match condition {
                        ExitCondition::Always => Ok(true),
                        ExitCondition::If(cond) => self.resolve(cond, &session),
                        ExitCondition::IfFailed => Ok(session.is_failed()),
                    };
                    match exit {
                        Ok(true) => Self::exit(session, scope),
                        Ok(false) => Flow::Next(session),
                        Err(e) => Flow::Next(Self::fail(session, action.kind(), &e)),
                    }
                }
                Action::StopInjector(message) => {
                    let message = self
                        .resolve(message, &session)
                        .unwrap_or_else(|e| format!("unresolved message ({e})"));
                    tracing::error!(%message, "stop_injector fired, stopping the run");
                    self.stop.stop(StopReason::Injector(message));
                    Flow::Stopped(session)
                }
            }
        }
        .boxed()
    }

    fn exit(session: Session, scope: Option<&Frame<'_>>) -> Flow {
        match scope {
            Some(frame) => Flow::Interrupt {
                session,
                scope: frame.id,
                cause: Cause::Exit,
            },
            None => Flow::Exit(session),
        }
    }

    fn feed(source: &dyn RecordSource, session: Session) -> Session {
        match source.next_record() {
            Ok(record) => session.set_all(record),
            Err(e) => Self::fail(session, "feed", &e),
        }
    }

    fn condition_holds(
        &self,
        condition: &Condition,
        session: &Session,
    ) -> Result<bool, EvaluationError> {
        match condition {
            Condition::Predicate(source) => self.resolve(source, session),
            Condition::Equals(actual, expected) => {
                let actual = self.resolve(actual, session)?;
                let expected = self.resolve(expected, session)?;
                Ok(values_equal(&actual, &expected))
            }
        }
    }

    /// Condition and duration check shared by `AsLongAs` and `DoWhile`
    fn guard_holds(
        &self,
        guard: &LoopGuard,
        started: Instant,
        session: &Session,
        check_condition: bool,
    ) -> Result<bool, EvaluationError> {
        let (condition, duration) = match guard {
            LoopGuard::AsLongAs {
                condition,
                duration,
            } => (condition.as_ref(), duration.as_ref()),
            LoopGuard::DoWhile {
                condition,
                duration,
            } => (Some(condition), duration.as_ref()),
            LoopGuard::Times(_) | LoopGuard::Foreach { .. } | LoopGuard::Forever => {
                return Ok(true)
            }
        };
        if let Some(duration) = duration {
            let limit = self.resolve(duration, session)?;
            if self.clock.now().saturating_duration_since(started) >= limit {
                return Ok(false);
            }
        }
        match condition {
            Some(condition) if check_condition => self.resolve(condition, session),
            _ => Ok(true),
        }
    }

    fn pick<'c>(&self, choices: &'c [WeightedChoice]) -> Option<&'c Chain> {
        let draw: f64 = self.rng.lock().random_range(0.0..100.0);
        let mut cumulative = 0.0;
        for choice in choices {
            cumulative += choice.weight;
            if draw < cumulative {
                return Some(&choice.chain);
            }
        }
        // percentages summing to 100 can fall just short after rounding
        if 100.0 - cumulative <= WEIGHT_EPSILON {
            return choices.last().map(|choice| &choice.chain);
        }
        None
    }

    fn draw_interval(
        &self,
        interval: &Interval,
        session: &Session,
    ) -> Result<Duration, EvaluationError> {
        match interval {
            Interval::Fixed(duration) => self.resolve(duration, session),
            Interval::Uniform { min, max } => {
                let min = self.resolve(min, session)?;
                let max = self.resolve(max, session)?;
                let (low, high) = (min.as_secs_f64(), max.as_secs_f64());
                if high <= low {
                    return Ok(min);
                }
                let secs = self.rng.lock().random_range(low..high);
                Ok(Duration::try_from_secs_f64(secs).map_or(min, |drawn| drawn.clamp(min, max)))
            }
        }
    }

    async fn run_pace(&self, interval: &Interval, counter: &Arc<str>, session: Session) -> Flow {
        let target = match self.draw_interval(interval, &session) {
            Ok(target) => target,
            Err(e) => return Flow::Next(Self::fail(session, "pace", &e)),
        };
        let now = self.clock.now();
        let Some(next_allowed) = session.pace_deadline(counter) else {
            return match Self::deadline(now, target) {
                Ok(deadline) => Flow::Next(session.with_pace_deadline(counter, deadline)),
                Err(e) => Flow::Next(Self::fail(session, "pace", &e)),
            };
        };
        if next_allowed > now {
            if !self.sleep_until(next_allowed).await {
                return Flow::Stopped(session);
            }
        } else {
            tracing::warn!(
                pace = %counter,
                overrun_ms = u64::try_from((now - next_allowed).as_millis()).unwrap_or(u64::MAX),
                "pace interval overrun, proceeding immediately"
            );
        }
        match Self::deadline(next_allowed, target) {
            Ok(deadline) => Flow::Next(session.with_pace_deadline(counter, deadline)),
            Err(e) => Flow::Next(Self::fail(session, "pace", &e)),
        }
    }

    fn run_loop<'a>(
        &'a self,
        spec: &'a LoopSpec,
        session: Session,
        scope: Option<&'a Frame<'a>>,
    ) -> BoxFuture<'a, Flow> {
        async move {
            let counter = spec.counter.as_ref();
            let started = self.clock.now();
            let mut session = match session.enter_counter(&spec.counter, started) {
                Ok(entered) => entered,
                Err(e) => return Flow::Next(Self::fail(session, "loop", &e)),
            };

            let plan = match &spec.guard {
                LoopGuard::Times(times) => self.resolve(times, &session).map(Plan::Times),
                LoopGuard::Foreach { values, .. } => self.resolve(values, &session).map(Plan::Each),
                LoopGuard::AsLongAs { .. } | LoopGuard::DoWhile { .. } | LoopGuard::Forever => {
                    Ok(Plan::Guarded)
                }
            };
            let plan = match plan {
                Ok(plan) => plan,
                Err(e) => {
                    let failed = Self::fail(session, "loop", &e);
                    return Flow::Next(Self::leave(failed, counter, self.clock.now()));
                }
            };

            let frame = Frame::new(FrameKind::Loop { spec, started }, scope);
            loop {
                if self.stop.is_stopped() {
                    return Flow::Stopped(Self::leave(session, counter, self.clock.now()));
                }

                let iteration = session.counter(counter).map_or(0, |c| c.iteration);
                let proceed = match (&plan, &spec.guard) {
                    (Plan::Times(times), _) => Ok(iteration < *times),
                    (Plan::Each(values), _) => Ok(usize::try_from(iteration)
                        .is_ok_and(|index| index < values.len())),
                    (Plan::Guarded, LoopGuard::DoWhile { .. }) if iteration == 0 => Ok(true),
                    (Plan::Guarded, guard) => self.guard_holds(guard, started, &session, true),
                };
                match proceed {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        session = Self::fail(session, "loop", &e);
                        break;
                    }
                }

                if let (Plan::Each(values), LoopGuard::Foreach { element, .. }) =
                    (&plan, &spec.guard)
                {
                    let index = usize::try_from(iteration).unwrap_or(usize::MAX);
                    if let Some(value) = values.get(index) {
                        session = session.set(element.to_string(), value.clone());
                    }
                }

                match self.run_chain(&spec.body, session, Some(&frame)).await {
                    Flow::Next(next) => session = next,
                    Flow::Interrupt {
                        session: next,
                        scope,
                        ..
                    } if scope == frame.id => {
                        session = next;
                        break;
                    }
                    other => {
                        let now = self.clock.now();
                        return other.map_session(|s| Self::leave(s, counter, now));
                    }
                }

                session = match session.increment_counter(counter) {
                    Ok(next) => next,
                    Err(e) => {
                        session = Self::fail(session, "loop", &e);
                        break;
                    }
                };
                tokio::task::yield_now().await;
            }
            Flow::Next(Self::leave(session, counter, self.clock.now()))
        }
        .boxed()
    }

    fn run_try<'a>(
        &'a self,
        attempts: &'a ValueSource<u64>,
        counter: &'a Arc<str>,
        body: &'a Chain,
        session: Session,
        scope: Option<&'a Frame<'a>>,
    ) -> BoxFuture<'a, Flow> {
        async move {
            let max = match self.resolve(attempts, &session) {
                Ok(0) => {
                    let e = EvaluationError::TypeMismatch {
                        expected: "at least one attempt",
                        found: "0".into(),
                    };
                    return Flow::Next(Self::fail(session, "try_max", &e));
                }
                Ok(max) => max,
                Err(e) => return Flow::Next(Self::fail(session, "try_max", &e)),
            };

            let prior = session.status();
            let mut session = match session.enter_counter(counter, self.clock.now()) {
                Ok(entered) => entered,
                Err(e) => return Flow::Next(Self::fail(session, "try_max", &e)),
            };

            let frame = Frame::new(FrameKind::Try, scope);
            loop {
                let attempt = session.counter(counter).map_or(0, |c| c.iteration);
                let flow = self
                    .run_chain(body, session.mark_as_succeeded(), Some(&frame))
                    .await;
                let exited = match flow {
                    Flow::Next(next) => {
                        session = next;
                        false
                    }
                    Flow::Interrupt {
                        session: next,
                        scope,
                        cause,
                    } if scope == frame.id => {
                        session = next;
                        cause == Cause::Exit
                    }
                    other => {
                        let now = self.clock.now();
                        return other.map_session(|s| Self::leave(s, counter, now));
                    }
                };

                if exited {
                    break;
                }
                if !session.is_failed() {
                    session = session.with_status(prior);
                    break;
                }
                if attempt + 1 >= max {
                    tracing::debug!(attempts = max, "try_max gave up");
                    break;
                }
                tracing::debug!(attempt = attempt + 1, max, "try_max retrying");
                session = match session.increment_counter(counter) {
                    Ok(next) => next,
                    Err(e) => {
                        session = Self::fail(session, "try_max", &e);
                        break;
                    }
                };
                if self.stop.is_stopped() {
                    return Flow::Stopped(Self::leave(session, counter, self.clock.now()));
                }
            }
            Flow::Next(Self::leave(session, counter, self.clock.now()))
        }
        .boxed()
    }
}

impl fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualUser")
            .field("user_id", &self.user_id)
            .field("scenario", &self.scenario.name())
            .finish_non_exhaustive()
    }
}
