//! Feeders
//!
//! A feeder is the one long-lived mutable resource shared by every virtual
//! user of a run. Each pull is serialized behind a single mutex, so under
//! queue semantics no two users ever receive the same record.
//!
//! Records come from memory, JSON (an array of objects) or CSV (the header
//! row names the attributes). A [`Feeder`] always holds at least one record,
//! so the circular and random strategies never run out.

use crate::error::FeederError;
use crate::value::Value;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// One data record: attribute name → value
pub type Record = BTreeMap<String, Value>;

/// Source of records consumed by feed actions
pub trait RecordSource: Send + Sync + fmt::Debug {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Pull the next record
    ///
    /// # Errors
    /// `FeederError::Exhausted` when the source has nothing left to give
    fn next_record(&self) -> Result<Record, FeederError>;
}

/// What happens when the end of the records is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeederStrategy {
    /// Hand out each record once, in order, then fail
    #[default]
    Queue,
    /// Wrap around to the first record
    Circular,
    /// Sample with replacement, forever
    Random,
    /// Shuffle once, then behave like a queue
    Shuffle,
}

struct FeederState {
    cursor: usize,
    order: Option<Vec<usize>>,
    rng: StdRng,
}

/// In-memory feeder over a fixed set of records
pub struct Feeder {
    name: String,
    records: Arc<[Record]>,
    strategy: FeederStrategy,
    state: Mutex<FeederState>,
}

impl Feeder {
    /// Create a queue feeder
    ///
    /// # Errors
    /// `FeederError::Load` if there are no records
    pub fn new(
        name: impl Into<String>,
        records: impl Into<Vec<Record>>,
    ) -> Result<Self, FeederError> {
        let name = name.into();
        let records: Vec<Record> = records.into();
        if records.is_empty() {
            return Err(FeederError::Load(format!("feeder '{name}' has no records")));
        }
        Ok(Self {
            name,
            records: records.into(),
            strategy: FeederStrategy::Queue,
            state: Mutex::new(FeederState {
                cursor: 0,
                order: None,
                rng: StdRng::from_os_rng(),
            }),
        })
    }

    /// Parse a JSON array of objects
    ///
    /// # Errors
    /// `FeederError::Load` if the text is not an array of objects
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Result<Self, FeederError> {
        let values: Vec<Value> =
            serde_json::from_str(json).map_err(|e| FeederError::Load(e.to_string()))?;
        let records = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match value {
                Value::Object(map) => Ok(map.into_iter().collect::<Record>()),
                other => Err(FeederError::Load(format!(
                    "record {i} is not an object: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, records)
    }

    /// Load a JSON array of objects from a file; the feeder is named after
    /// the file stem
    ///
    /// # Errors
    /// `FeederError::Load` on I/O or parse failure
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FeederError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FeederError::Load(format!("{}: {e}", path.display())))?;
        let feeder = Self::from_json_str(file_stem(path), &text)?;
        feeder.log_loaded(path);
        Ok(feeder)
    }

    /// Read CSV records. The header row names the attributes and every
    /// field is kept as a string. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    /// `FeederError::Load` on a read error, a malformed row or no records
    pub fn from_csv_reader(name: impl Into<String>, reader: impl io::Read) -> Result<Self, FeederError> {
        let name = name.into();
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv
            .headers()
            .map_err(|e| FeederError::Load(format!("{name}: {e}")))?
            .clone();
        let records = csv
            .records()
            .map(|row| {
                let row = row.map_err(|e| FeederError::Load(format!("{name}: {e}")))?;
                Ok(headers
                    .iter()
                    .zip(row.iter())
                    .map(|(key, field)| (key.to_string(), Value::from(field)))
                    .collect::<Record>())
            })
            .collect::<Result<Vec<_>, FeederError>>()?;
        Self::new(name, records)
    }

    /// Load a CSV file; the feeder is named after the file stem
    ///
    /// # Errors
    /// `FeederError::Load` on I/O or parse failure
    pub fn from_csv_file(path: impl AsRef<Path>) -> Result<Self, FeederError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| FeederError::Load(format!("{}: {e}", path.display())))?;
        let feeder = Self::from_csv_reader(file_stem(path), io::BufReader::new(file))?;
        feeder.log_loaded(path);
        Ok(feeder)
    }

    fn log_loaded(&self, path: &Path) {
        tracing::debug!(
            feeder = %self.name,
            records = self.len(),
            path = %path.display(),
            "loaded feeder records"
        );
    }

    /// Use a strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: FeederStrategy) -> Self {
        self.strategy = strategy;
        self.state.get_mut().order = None;
        self
    }

    /// Queue strategy
    #[must_use]
    pub fn queue(self) -> Self {
        self.with_strategy(FeederStrategy::Queue)
    }

    /// Circular strategy
    #[must_use]
    pub fn circular(self) -> Self {
        self.with_strategy(FeederStrategy::Circular)
    }

    /// Random strategy
    #[must_use]
    pub fn random(self) -> Self {
        self.with_strategy(FeederStrategy::Random)
    }

    /// Shuffle strategy
    #[must_use]
    pub fn shuffle(self) -> Self {
        self.with_strategy(FeederStrategy::Shuffle)
    }

    /// Seed the random and shuffle strategies
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        let state = self.state.get_mut();
        state.rng = StdRng::seed_from_u64(seed);
        state.order = None;
        self
    }

    /// Wrap in an `Arc` for sharing across feed actions
    #[inline]
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Current strategy
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> FeederStrategy {
        self.strategy
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`: a feeder cannot be built without records
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records still available, `None` for strategies that never run out
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        match self.strategy {
            FeederStrategy::Queue | FeederStrategy::Shuffle => {
                Some(self.records.len().saturating_sub(self.state.lock().cursor))
            }
            FeederStrategy::Circular | FeederStrategy::Random => None,
        }
    }

    fn exhausted(&self) -> FeederError {
        FeederError::Exhausted {
            feeder: self.name.clone(),
        }
    }
}

impl RecordSource for Feeder {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_record(&self) -> Result<Record, FeederError> {
        let len = self.records.len();
        let mut state = self.state.lock();
        let index = match self.strategy {
            FeederStrategy::Queue => {
                if state.cursor >= len {
                    return Err(self.exhausted());
                }
                state.cursor
            }
            FeederStrategy::Circular => state.cursor % len,
            FeederStrategy::Random => state.rng.random_range(0..len),
            FeederStrategy::Shuffle => {
                if state.cursor >= len {
                    return Err(self.exhausted());
                }
                let FeederState {
                    cursor, order, rng, ..
                } = &mut *state;
                let order = order.get_or_insert_with(|| {
                    let mut order: Vec<usize> = (0..len).collect();
                    order.shuffle(rng);
                    order
                });
                order[*cursor]
            }
        };
        state.cursor = state.cursor.wrapping_add(1);
        Ok(self.records[index].clone())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "feeder".to_string(), |s| s.to_string_lossy().into_owned())
}

impl fmt::Debug for Feeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feeder")
            .field("name", &self.name)
            .field("records", &self.records.len())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Feeder over an arbitrary iterator; runs out when the iterator does
pub struct IteratorFeeder {
    name: String,
    records: Mutex<Box<dyn Iterator<Item = Record> + Send>>,
}

impl IteratorFeeder {
    /// Wrap an iterator
    #[must_use]
    pub fn new<I>(name: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send + 'static,
    {
        Self {
            name: name.into(),
            records: Mutex::new(Box::new(records.into_iter())),
        }
    }
}

impl RecordSource for IteratorFeeder {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_record(&self) -> Result<Record, FeederError> {
        self.records
            .lock()
            .next()
            .ok_or_else(|| FeederError::Exhausted {
                feeder: self.name.clone(),
            })
    }
}

impl fmt::Debug for IteratorFeeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IteratorFeeder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
