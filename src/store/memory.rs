// ABOUTME: In-memory record store backed by an insertion-ordered vector
// ABOUTME: Allows duplicate keys so partition boundary behavior can be observed directly

use super::{RecordFilter, RecordStore};
use crate::error::Result;
use crate::record::{FieldInfo, Key, Record};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    fields: Vec<FieldInfo>,
    rows: Vec<Record>,
    next_key: i64,
}

impl MemoryStore {
    pub fn new(name: &str, fields: Vec<FieldInfo>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            rows: Vec::new(),
            next_key: 1,
        }
    }

    /// Build a store holding `records` as-is (keys, including duplicates, are kept)
    pub fn with_records(name: &str, fields: Vec<FieldInfo>, records: Vec<Record>) -> Self {
        let mut store = Self::new(name, fields);
        store.push_all(records);
        store
    }

    pub fn records(&self) -> &[Record] {
        &self.rows
    }

    fn push_all(&mut self, records: Vec<Record>) -> usize {
        let written = records.len();
        for mut record in records {
            match &record.pk {
                Some(Key::Int(i)) => self.next_key = self.next_key.max(i + 1),
                Some(Key::Text(_)) => {}
                None => {
                    record.pk = Some(Key::Int(self.next_key));
                    self.next_key += 1;
                }
            }
            self.rows.push(record);
        }
        written
    }
}

impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> Result<Vec<FieldInfo>> {
        Ok(self.fields.clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    fn keys(&self) -> Result<Vec<Key>> {
        let mut keys: Vec<Key> = self.rows.iter().filter_map(|r| r.pk.clone()).collect();
        keys.sort();
        Ok(keys)
    }

    fn iterate(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut selected: Vec<Record> = self
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // stable: duplicate keys keep insertion order
        selected.sort_by(|a, b| a.pk.cmp(&b.pk));
        Ok(selected)
    }

    fn bulk_insert(&mut self, records: Vec<Record>) -> Result<usize> {
        Ok(self.push_all(records))
    }

    fn delete(&mut self, keys: &[Key]) -> Result<usize> {
        let before = self.rows.len();
        self.rows
            .retain(|r| !r.pk.as_ref().is_some_and(|k| keys.contains(k)));
        Ok(before - self.rows.len())
    }

    fn clear(&mut self) -> Result<usize> {
        let removed = self.rows.len();
        self.rows.clear();
        Ok(removed)
    }
}
