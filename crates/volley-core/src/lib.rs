//! Volley Core - per-user state for the scenario engine
//!
//! Everything one virtual user carries or consults while it walks a chain:
//! - [`Session`]: persistent attributes, status flag, loop counters, pacers
//! - [`ValueSource`]: constant, expression or callback, resolved per session
//! - [`ExpressionEngine`]: the collaborator that evaluates expression strings
//! - [`Feeder`] / [`RecordSource`]: shared, serialized data record suppliers
//!
//! # Example
//!
//! ```rust
//! use volley_core::{Session, SimpleExpressions, UserId, ValueSource};
//!
//! let session = Session::new("checkout", UserId(1)).set("x", 1);
//! let cond: ValueSource<bool> = "#{x} == 1".into();
//! assert!(cond.resolve(&session, &SimpleExpressions::new()).unwrap());
//! ```

pub mod error;
pub mod expression;
pub mod feeder;
pub mod session;
pub mod source;
pub mod value;

pub use error::{EvaluationError, FeederError, SessionError};
pub use expression::{ExpressionEngine, SimpleExpressions};
pub use feeder::{Feeder, FeederStrategy, IteratorFeeder, Record, RecordSource};
pub use session::{LoopCounter, Session, Status, UserId};
pub use source::ValueSource;
pub use value::{parse_duration, values_equal, FromValue, Value};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building sessions and feeders
    pub use crate::{
        Feeder, FeederStrategy, Record, RecordSource, Session, SimpleExpressions, UserId, Value,
        ValueSource,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
