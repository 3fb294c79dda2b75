//! Volley Chain - construction phase
//!
//! Immutable action chains and the builders that produce them:
//! - [`Action`]: one control-flow or effect unit
//! - [`Chain`]: persistent action sequence, its own builder
//! - Block builders ([`DoIf`], [`DoSwitch`], [`LoopBuilder`], [`TryMax`], ...)
//!   that close back into the parent chain
//! - [`Scenario`]: a validated chain, the only input the engine accepts
//!
//! Structural mistakes (empty switches, bad weights, reused counters) are
//! reported here as [`ConstructionError`], before any user runs.
//!
//! # Example
//!
//! ```rust
//! use volley_chain::{Chain, Scenario};
//!
//! # fn main() -> Result<(), volley_chain::ConstructionError> {
//! let body = Chain::new().exec(|s| s.set("visited", true));
//! let chain = Chain::new().try_max(3u64).on(body)?.exit_here_if_failed();
//! let scenario = Scenario::new("retrying", chain)?;
//! assert_eq!(scenario.chain().len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod chain;
pub mod counter;
pub mod error;
pub mod scenario;

pub use action::{
    Action, AsyncFnEffect, Condition, Effect, ExitCondition, FnEffect, Interval, LoopGuard,
    LoopSpec, WeightedChoice,
};
pub use chain::{
    Chain, ChainBuilder, DoIf, DoIfOrElse, DoIfOrElseThen, DoSwitch, DoSwitchOrElse,
    DoSwitchOrElseOn, LoopBuilder, RandomSwitch, RandomSwitchOrElse, RandomSwitchOrElseOn, TryMax,
    UniformRandomSwitch, WEIGHT_EPSILON,
};
pub use counter::{auto_name, CounterKind};
pub use error::ConstructionError;
pub use scenario::Scenario;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building scenarios
    pub use crate::{Chain, ConstructionError, Effect, Interval, Scenario};
}
