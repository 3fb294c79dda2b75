//! Engine / scheduler
//!
//! The execution phase. The engine only accepts a [`Scenario`]: all
//! structural checks already happened while the chain was built. It:
//! - Injects virtual users per the configured profile, one tokio task each
//! - Arms the run deadline, if any
//! - Stops injecting as soon as the stop signal is raised
//! - Collects every user's outcome into a [`RunSummary`]

use crate::clock::{Clock, TokioClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runner::{Termination, UserOutcome, VirtualUser};
use crate::stop::{StopReason, StopSignal};
use futures::future::join_all;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use ulid::Ulid;
use volley_chain::Scenario;
use volley_core::UserId;

/// Result of one engine run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: Ulid,
    /// Scenario name
    pub scenario: String,
    /// Users configured for injection
    pub users_planned: u64,
    /// Users actually started
    pub users_started: u64,
    /// Users that reached the end of the chain
    pub completed: u64,
    /// Users that left through an exit action
    pub exited: u64,
    /// Users cut short by the stop signal
    pub stopped: u64,
    /// Users whose session ended failed, whatever their termination
    pub failed: u64,
    /// Users whose task panicked; they have no outcome
    pub panicked: u64,
    /// Why the run stopped early, if it did
    pub stop_reason: Option<StopReason>,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
    /// Per-user outcomes, in injection order
    #[serde(skip)]
    pub outcomes: Vec<UserOutcome>,
}

impl RunSummary {
    fn new(run_id: Ulid, scenario: &str, users_planned: u64) -> Self {
        Self {
            run_id,
            scenario: scenario.to_string(),
            users_planned,
            users_started: 0,
            completed: 0,
            exited: 0,
            stopped: 0,
            failed: 0,
            panicked: 0,
            stop_reason: None,
            elapsed_ms: 0,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: UserOutcome) {
        match outcome.termination {
            Termination::Completed => self.completed += 1,
            Termination::Exited => self.exited += 1,
            Termination::Stopped => self.stopped += 1,
        }
        if outcome.is_failed() {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Whether every started user finished without failure and nothing
    /// aborted the run
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed == 0
            && self.panicked == 0
            && !matches!(self.stop_reason, Some(StopReason::Injector(_)))
    }

    /// Elapsed time
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        let _ = writeln!(report, "=== Volley Run Report ===\n");
        let _ = writeln!(report, "Run: {}", self.run_id);
        let _ = writeln!(report, "Scenario: {}", self.scenario);
        let _ = writeln!(report, "Users Planned: {}", self.users_planned);
        let _ = writeln!(report, "Users Started: {}", self.users_started);
        let _ = writeln!(report, "Completed: {}", self.completed);
        let _ = writeln!(report, "Exited: {}", self.exited);
        let _ = writeln!(report, "Stopped: {}", self.stopped);
        let _ = writeln!(report, "Failed Sessions: {}", self.failed);
        if self.panicked > 0 {
            let _ = writeln!(report, "Panicked Users: {}", self.panicked);
        }
        let _ = writeln!(report, "Elapsed: {}ms", self.elapsed_ms);

        if let Some(reason) = &self.stop_reason {
            let _ = writeln!(report, "\nRun stopped early: {reason}");
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );

        report
    }
}

/// Scenario engine
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Create an engine on the tokio clock
    ///
    /// # Errors
    /// `EngineError::Config` if the configuration does not validate
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(TokioClock),
        })
    }

    /// Use another clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a scenario to completion
    ///
    /// # Errors
    /// `EngineError::Join` if a user task was cancelled
    pub async fn run(&self, scenario: &Scenario) -> Result<RunSummary, EngineError> {
        self.run_with_signal(scenario, StopSignal::new()).await
    }

    /// Run a scenario with a caller-owned stop signal
    ///
    /// A user whose task panics is logged and counted in
    /// [`RunSummary::panicked`]; the rest of the run carries on.
    ///
    /// # Errors
    /// `EngineError::Join` if a user task was cancelled
    pub async fn run_with_signal(
        &self,
        scenario: &Scenario,
        stop: StopSignal,
    ) -> Result<RunSummary, EngineError> {
        let run_id = Ulid::new();
        let injection = self.config.injection;
        let users = injection.users();
        let started = self.clock.now();

        tracing::info!(
            run = %run_id,
            scenario = scenario.name(),
            users,
            "starting run"
        );

        let deadline = self.config.max_duration().and_then(|limit| {
            let deadline = started.checked_add(limit);
            if deadline.is_none() {
                tracing::warn!(?limit, "maximum run duration out of range, no deadline armed");
            }
            deadline
        });
        let watchdog = deadline.map(|deadline| {
            let clock = Arc::clone(&self.clock);
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = clock.sleep_until(deadline) => {
                        if stop.stop(StopReason::MaxDuration) {
                            tracing::info!("maximum run duration reached");
                        }
                    }
                    () = stop.stopped() => {}
                }
            })
        });

        let mut handles = Vec::new();
        for index in 0..users {
            let at = started + injection.offset(index);
            if at > self.clock.now() {
                tokio::select! {
                    () = self.clock.sleep_until(at) => {}
                    () = stop.stopped() => {}
                }
            }
            if stop.is_stopped() {
                tracing::info!(
                    started = index,
                    remaining = users - index,
                    "stop signal raised, injection halted"
                );
                break;
            }

            let user = VirtualUser::new(
                UserId(index),
                scenario.clone(),
                Arc::clone(&self.clock),
                stop.clone(),
                self.config.seed,
            );
            let span = tracing::info_span!("user", scenario = scenario.name(), user_id = index);
            handles.push(tokio::spawn(user.run().instrument(span)));
        }

        let mut summary = RunSummary::new(run_id, scenario.name(), users);
        summary.users_started = handles.len() as u64;
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.is_panic() => {
                    tracing::error!(user_id = index, error = %e, "virtual user panicked");
                    summary.panicked += 1;
                }
                Err(e) => return Err(EngineError::Join(e.to_string())),
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        summary.stop_reason = stop.reason();
        summary.elapsed_ms =
            u64::try_from(self.clock.now().duration_since(started).as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            run = %run_id,
            completed = summary.completed,
            exited = summary.exited,
            stopped = summary.stopped,
            failed = summary.failed,
            panicked = summary.panicked,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_chain::Chain;

    #[tokio::test]
    async fn summary_counts_outcomes() {
        let chain = Chain::new()
            .do_if("#{fail.exists()}")
            .then(Chain::new().exit_here())
            .exec(|s| {
                if s.user_id().0 % 2 == 0 {
                    s.mark_as_failed()
                } else {
                    s
                }
            });
        let scenario = Scenario::new("counts", chain).unwrap();
        let engine = Engine::new(EngineConfig::new().at_once(4)).unwrap();

        let summary = engine.run(&scenario).await.unwrap();
        assert_eq!(summary.users_started, 4);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 2);
        assert!(!summary.passed());
        assert!(summary.generate_text().contains("Failed Sessions: 2"));
    }

    #[tokio::test]
    async fn panicking_user_is_counted_not_fatal() {
        let chain = Chain::new().exec(|s| {
            assert!(s.user_id().0 != 1, "user 1 blew up");
            s.set("ok", true)
        });
        let scenario = Scenario::new("panics", chain).unwrap();
        let engine = Engine::new(EngineConfig::new().at_once(3)).unwrap();

        let summary = engine.run(&scenario).await.unwrap();
        assert_eq!(summary.users_started, 3);
        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.outcomes.len(), 2);
        assert!(!summary.passed());
        assert!(summary.generate_text().contains("Panicked Users: 1"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Engine::new(EngineConfig::new().at_once(0)).unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn summary_serializes_without_outcomes() {
        let summary = RunSummary::new(Ulid::new(), "json", 3);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["users_planned"], 3);
        assert!(json.get("outcomes").is_none());
    }
}
