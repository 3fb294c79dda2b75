//! Counter names for loop, retry and pace scopes
//!
//! Blocks that are not given a name get one from a process-wide monotonic
//! sequence. Generated names carry a reserved prefix and never repeat, so
//! two auto-named blocks cannot collide however they are nested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prefix reserved for generated counter names
pub const AUTO_PREFIX: &str = "__volley.";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Kind of scope a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Loop iteration index
    Loop,
    /// Retry attempt index
    Try,
    /// Pace deadline
    Pace,
}

impl CounterKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Try => "try",
            Self::Pace => "pace",
        }
    }
}

/// Generate a fresh counter name
#[must_use]
pub fn auto_name(kind: CounterKind) -> Arc<str> {
    let n = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Arc::from(format!("{AUTO_PREFIX}{}.{n}", kind.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_names_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..250)
                        .map(|_| auto_name(CounterKind::Loop))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let names: HashSet<Arc<str>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(names.len(), 1000);
        assert!(names.iter().all(|n| n.starts_with(AUTO_PREFIX)));
    }

    #[test]
    fn generated_names_carry_their_kind() {
        assert!(auto_name(CounterKind::Pace).contains(".pace."));
        assert!(auto_name(CounterKind::Try).starts_with("__volley.try."));
    }
}
