//! Volley Engine - execution phase
//!
//! Drives virtual users through a [`Scenario`](volley_chain::Scenario):
//! - [`Engine`]: injection, scheduling, run deadline, summary
//! - [`VirtualUser`]: depth-first interpreter for one user's chain
//! - [`Clock`]: monotonic time and wake-ups used by loops, pauses and pacing
//! - [`StopSignal`]: the run-wide stop flag raised by `stop_injector`
//!
//! # Example
//!
//! ```rust,no_run
//! use volley_chain::{Chain, Scenario};
//! use volley_engine::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = Chain::new().exec(|s| s.set("hello", "world"));
//! let scenario = Scenario::new("hello", chain)?;
//!
//! let engine = Engine::new(EngineConfig::new().ramp(100, 10))?;
//! let summary = engine.run(&scenario).await?;
//! println!("{}", summary.generate_text());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod runner;
pub mod stop;

pub use clock::{Clock, TokioClock};
pub use config::{EngineConfig, Injection, MAX_CONFIGURED_SECS};
pub use engine::{Engine, RunSummary};
pub use error::{ConfigError, EngineError};
pub use runner::{Termination, UserOutcome, VirtualUser};
pub use stop::{StopReason, StopSignal};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running scenarios
    pub use crate::{Engine, EngineConfig, Injection, RunSummary, StopSignal, Termination};
    pub use volley_chain::prelude::*;
    pub use volley_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
