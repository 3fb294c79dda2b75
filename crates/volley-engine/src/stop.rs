//! Global stop signal
//!
//! One [`StopSignal`] is created per run and cloned into every virtual user.
//! It is a tokio `watch` channel holding the first stop reason: users check
//! it at every action boundary and race it against every suspension.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why a run was stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StopReason {
    /// A `stop_injector` action fired
    Injector(String),
    /// The configured maximum run duration elapsed
    MaxDuration,
    /// Stopped from outside the run (signal handler, embedding code)
    External(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Injector(message) => write!(f, "stop_injector: {message}"),
            Self::MaxDuration => f.write_str("maximum duration reached"),
            Self::External(message) => write!(f, "external stop: {message}"),
        }
    }
}

/// Shared, run-scoped stop flag
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<StopReason>>>,
    rx: watch::Receiver<Option<StopReason>>,
}

impl StopSignal {
    /// Create an unset signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Raise the signal. Returns `false` if it was already raised; the first
    /// reason is kept.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Whether the signal has been raised
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The reason the signal was raised with
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        self.rx.borrow().clone()
    }

    /// Resolve once the signal is raised
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        // the sender lives in `self`, so this only returns once raised
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
