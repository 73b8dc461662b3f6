//! Row sources that parameterize iterations.
//!
//! A feeder is shared by every virtual user running a scenario, so `next`
//! takes `&self` and implementations synchronize internally. The built-in
//! [`RecordFeeder`] hands out rows from memory with a single atomic cursor.
use std::{
    fmt::Debug,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use serde::Deserialize;
use thiserror::Error;

use crate::value::Value;

/// One feeder row: column name to cell value.
pub type Row = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feeder `{0}` has no more rows")]
pub struct FeederExhausted(pub String);

#[derive(Debug, Error)]
pub enum FeederLoadError {
    #[error("failed to read feeder `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feeder `{name}` is not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("feeder `{name}` must be an array of objects (entry {index} is not)")]
    NotARecord { name: String, index: usize },
    #[error("feeder `{name}` is not valid CSV: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },
}

/// External source of per-iteration substitution data.
pub trait Feeder: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Pull the next row, or signal that a finite feeder ran dry.
    fn next(&self) -> Result<Row, FeederExhausted>;
}

/// What happens once every row has been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStrategy {
    /// Each row is used once, then the feeder is exhausted.
    #[default]
    Queue,
    /// Wrap back to the first row; never exhausted unless empty.
    Circular,
}

/// In-memory feeder over a fixed list of rows.
#[derive(Debug)]
pub struct RecordFeeder {
    name: String,
    records: Vec<Row>,
    strategy: FeedStrategy,
    cursor: AtomicUsize,
}

impl RecordFeeder {
    pub fn new(name: impl Into<String>, records: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            records,
            strategy: FeedStrategy::Queue,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn circular(self) -> Self {
        self.strategy(FeedStrategy::Circular)
    }

    pub fn queue(self) -> Self {
        self.strategy(FeedStrategy::Queue)
    }

    pub fn strategy(mut self, strategy: FeedStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build from a JSON array of flat or nested objects.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, FeederLoadError> {
        let name = name.into();
        let parsed: serde_json::Value =
            serde_json::from_str(json).map_err(|source| FeederLoadError::Json {
                name: name.clone(),
                source,
            })?;
        let records = records_from_json(&name, parsed)?;
        Ok(Self::new(name, records))
    }

    pub fn from_json_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, FeederLoadError> {
        let name = name.into();
        let text = std::fs::read_to_string(path).map_err(|source| FeederLoadError::Io {
            name: name.clone(),
            source,
        })?;
        Self::from_json(name, &text)
    }

    /// Build from CSV text. The header row names the columns and every
    /// cell is kept as a string.
    pub fn from_csv(name: impl Into<String>, csv: &str) -> Result<Self, FeederLoadError> {
        let name = name.into();
        let records = records_from_csv(&name, csv)?;
        Ok(Self::new(name, records))
    }

    pub fn from_csv_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, FeederLoadError> {
        let name = name.into();
        let text = std::fs::read_to_string(path).map_err(|source| FeederLoadError::Io {
            name: name.clone(),
            source,
        })?;
        Self::from_csv(name, &text)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Feeder for RecordFeeder {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Result<Row, FeederExhausted> {
        let exhausted = || FeederExhausted(self.name.clone());
        if self.records.is_empty() {
            return Err(exhausted());
        }

        let index = match self.strategy {
            FeedStrategy::Circular => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.records.len()
            }
            // Stop advancing once past the end so the cursor cannot wrap.
            FeedStrategy::Queue => self
                .cursor
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| {
                    (i < self.records.len()).then_some(i + 1)
                })
                .map_err(|_| exhausted())?,
        };

        Ok(self.records[index].clone())
    }
}

pub(crate) fn records_from_json(
    name: &str,
    parsed: serde_json::Value,
) -> Result<Vec<Row>, FeederLoadError> {
    let not_a_record = |index| FeederLoadError::NotARecord {
        name: name.to_owned(),
        index,
    };
    let serde_json::Value::Array(entries) = parsed else {
        return Err(not_a_record(0));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect::<Row>()),
            _ => Err(not_a_record(index)),
        })
        .collect()
}

fn records_from_csv(name: &str, text: &str) -> Result<Vec<Row>, FeederLoadError> {
    let csv_error = |source| FeederLoadError::Csv {
        name: name.to_owned(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(csv_error)?.clone();

    reader
        .records()
        .map(|record| -> Result<Row, FeederLoadError> {
            let record = record.map_err(csv_error)?;
            Ok(headers
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| (column.to_owned(), Value::from(cell)))
                .collect())
        })
        .collect()
}
