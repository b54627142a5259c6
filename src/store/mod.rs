// ABOUTME: Record store abstraction consumed by the partitioner, transfer and diff engines
// ABOUTME: Exports the RecordStore trait plus in-memory and SQLite implementations

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::record::{FieldInfo, Key, KeyRange, Record};
use serde_json::Value;

/// Selection of records passed to [`RecordStore::iterate`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    All,
    /// Inclusive on both ends, so duplicate boundary keys land in both adjoining batches
    KeyRange(KeyRange),
    Keys(Vec<Key>),
    FieldIn { field: String, values: Vec<Value> },
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::KeyRange(range) => record.pk.as_ref().is_some_and(|k| range.contains(k)),
            RecordFilter::Keys(keys) => record.pk.as_ref().is_some_and(|k| keys.contains(k)),
            RecordFilter::FieldIn { field, values } => {
                let value = record.get(field);
                !value.is_null() && values.contains(value)
            }
        }
    }
}

/// A tabular collection of keyed records.
///
/// The core never assumes anything about the backing database beyond this trait.
/// There is no locking: concurrent writers are detected after the fact through the
/// before/after row counts of [`crate::transfer::replace_write`].
pub trait RecordStore {
    /// Display name (table name for SQL backends)
    fn name(&self) -> &str;

    /// Field schema, excluding the key
    fn fields(&self) -> Result<Vec<FieldInfo>>;

    /// Total number of rows, including rows without a key
    fn count(&self) -> Result<usize>;

    /// All non-null keys in ascending order; duplicates are kept
    fn keys(&self) -> Result<Vec<Key>>;

    /// Records selected by `filter`, ordered by key
    fn iterate(&self, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Insert records; rows without a key get a fresh one. Returns rows written.
    fn bulk_insert(&mut self, records: Vec<Record>) -> Result<usize>;

    /// Delete every row whose key is in `keys`. Returns rows removed.
    fn delete(&mut self, keys: &[Key]) -> Result<usize>;

    /// Delete all rows. Returns rows removed.
    fn clear(&mut self) -> Result<usize>;

    fn count_matching(&self, filter: &RecordFilter) -> Result<usize> {
        Ok(self.iterate(filter)?.len())
    }

    fn filter_by_key_range(&self, low: &Key, high: &Key) -> Result<Vec<Record>> {
        self.iterate(&RecordFilter::KeyRange(KeyRange::new(low.clone(), high.clone())))
    }
}
