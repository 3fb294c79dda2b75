//! Testing utilities for the volley workspace
//!
//! Shared effects and fixtures. Every effect is cheap to clone and clones
//! share their counters, so a test keeps one handle and puts another in the
//! chain.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use volley_chain::Effect;
use volley_core::{Record, Session, UserId};

/// Counts its invocations and leaves the session alone
#[derive(Debug, Clone)]
pub struct CountingEffect {
    name: Arc<str>,
    calls: Arc<AtomicU64>,
}

impl CountingEffect {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn effect(&self) -> Arc<dyn Effect> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Effect for CountingEffect {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, session: Session) -> Session {
        self.calls.fetch_add(1, Ordering::SeqCst);
        session
    }
}

/// Marks the session failed on every call before `succeed_on`
#[derive(Debug, Clone)]
pub struct FlakyEffect {
    succeed_on: Option<u64>,
    calls: Arc<AtomicU64>,
}

impl FlakyEffect {
    /// Fails calls `1..k`, succeeds from call `k` on
    pub fn succeeding_on(k: u64) -> Self {
        Self {
            succeed_on: Some(k),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            succeed_on: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn effect(&self) -> Arc<dyn Effect> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Effect for FlakyEffect {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn apply(&self, session: Session) -> Session {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.succeed_on {
            Some(k) if call >= k => session,
            _ => session.mark_as_failed(),
        }
    }
}

/// Records the instant of every call
#[derive(Debug, Clone, Default)]
pub struct TimestampEffect {
    times: Arc<Mutex<Vec<Instant>>>,
}

impl TimestampEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.times.lock().clone()
    }

    /// Spacing between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        self.times()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    pub fn effect(&self) -> Arc<dyn Effect> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Effect for TimestampEffect {
    fn name(&self) -> &str {
        "timestamp"
    }

    async fn apply(&self, session: Session) -> Session {
        self.times.lock().push(Instant::now());
        session
    }
}

/// Simulates work by sleeping on the tokio timer
#[derive(Debug, Clone, Copy)]
pub struct SleepEffect(pub Duration);

impl SleepEffect {
    pub fn effect(self) -> Arc<dyn Effect> {
        Arc::new(self)
    }
}

#[async_trait]
impl Effect for SleepEffect {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn apply(&self, session: Session) -> Session {
        tokio::time::sleep(self.0).await;
        session
    }
}

/// `n` records of the form `{"id": i}`
pub fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::from([("id".to_string(), json!(i))]))
        .collect()
}

/// Session for user `id` of a test scenario
pub fn session(id: u64) -> Session {
    Session::new("test", UserId(id))
}

/// Attributes as a sorted list, for comparing sessions
pub fn attributes(session: &Session) -> Vec<(String, serde_json::Value)> {
    let mut attrs: Vec<_> = session
        .attributes()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    attrs
}
