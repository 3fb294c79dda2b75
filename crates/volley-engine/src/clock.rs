//! Clock service
//!
//! Monotonic time plus deferred wake-ups. Loops and pacing only ever talk to
//! a [`Clock`], so tests can run the whole engine on tokio's paused clock.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source with sleeping
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the calling task until `deadline`, without blocking others
    async fn sleep_until(&self, deadline: Instant);

    /// Suspend the calling task for `duration`
    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}
