// ABOUTME: Replace-write primitive: insert modified records as new rows, then delete the originals
// ABOUTME: Full before/after row counts detect lost updates from concurrent replace operations

use crate::error::{EtlError, Result};
use crate::record::{Key, Record};
use crate::store::{RecordFilter, RecordStore};
use std::collections::BTreeSet;

/// Write `records` over their existing rows in `dest`.
///
/// Every record is inserted as a new row (its key cleared so the store assigns a
/// fresh one), then the rows under the records' previous keys are deleted. The
/// return value is `rows_before - rows_after`, counted independently on the whole
/// store; it is zero unless another writer touched the store in between.
///
/// Records without a key have no original to delete, so each of them shows up as
/// one row of negative drift.
///
/// # Errors
///
/// With `ignore_errors` unset:
/// - [`EtlError::DeleteMismatch`] if the number of rows found under the previous keys
///   differs from the number of distinct keys
/// - [`EtlError::IntegrityDrift`] if the row count changed
///
/// With `ignore_errors` set, both are logged as warnings and the drift is returned.
pub fn replace_write<D: RecordStore + ?Sized>(
    dest: &mut D,
    records: Vec<Record>,
    ignore_errors: bool,
) -> Result<i64> {
    if records.is_empty() {
        return Ok(0);
    }
    let before = dest.count()?;

    let mut old_keys = BTreeSet::new();
    let fresh: Vec<Record> = records
        .into_iter()
        .map(|mut record| {
            if let Some(pk) = record.pk.take() {
                old_keys.insert(pk);
            }
            record
        })
        .collect();
    let old_keys: Vec<Key> = old_keys.into_iter().collect();

    tracing::debug!("Creating {} row(s) in '{}'", fresh.len(), dest.name());
    dest.bulk_insert(fresh)?;

    let matched = dest.count_matching(&RecordFilter::Keys(old_keys.clone()))?;
    if matched != old_keys.len() {
        let err = EtlError::DeleteMismatch {
            store: dest.name().to_string(),
            requested: old_keys.len(),
            matched,
        };
        if !ignore_errors {
            return Err(err);
        }
        tracing::warn!("⚠ {}", err);
    }

    tracing::debug!("Deleting {} original row(s)", old_keys.len());
    dest.delete(&old_keys)?;

    let after = dest.count()?;
    let drift = before as i64 - after as i64;
    if drift != 0 {
        let err = EtlError::IntegrityDrift {
            store: dest.name().to_string(),
            before,
            after,
        };
        if !ignore_errors {
            return Err(err);
        }
        tracing::warn!("⚠ {}", err);
    }
    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::record::FieldInfo;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        let records = (1..=5)
            .map(|i| Record::new(Some(Key::Int(i))).with_field("v", i))
            .collect();
        MemoryStore::with_records("t", vec![], records)
    }

    #[test]
    fn test_replace_keeps_row_count() {
        let mut dest = store();
        let mut modified = dest.iterate(&RecordFilter::Keys(vec![Key::Int(2), Key::Int(4)])).unwrap();
        for record in &mut modified {
            record.set("v", json!(100));
        }
        let drift = replace_write(&mut dest, modified, false).unwrap();
        assert_eq!(drift, 0);
        assert_eq!(dest.count().unwrap(), 5);
        let hundreds = dest
            .iterate(&RecordFilter::FieldIn {
                field: "v".into(),
                values: vec![json!(100)],
            })
            .unwrap();
        assert_eq!(hundreds.len(), 2);
        assert!(hundreds.iter().all(|r| r.pk > Some(Key::Int(5))));
    }

    #[test]
    fn test_empty_list_is_noop() {
        let mut dest = store();
        assert_eq!(replace_write(&mut dest, vec![], false).unwrap(), 0);
    }

    #[test]
    fn test_missing_originals_are_delete_mismatch() {
        let mut dest = store();
        let ghost = vec![Record::new(Some(Key::Int(99))).with_field("v", 1)];
        assert!(matches!(
            replace_write(&mut dest, ghost.clone(), false),
            Err(EtlError::DeleteMismatch {
                requested: 1,
                matched: 0,
                ..
            })
        ));

        let mut dest = store();
        let drift = replace_write(&mut dest, ghost, true).unwrap();
        assert_eq!(drift, -1);
    }

    #[test]
    fn test_duplicated_originals_are_delete_mismatch() {
        let with_twin = || {
            let mut records = store().records().to_vec();
            records.push(Record::new(Some(Key::Int(3))).with_field("v", 33));
            MemoryStore::with_records("t", vec![], records)
        };
        let update = vec![Record::new(Some(Key::Int(3))).with_field("v", 300)];

        let mut dest = with_twin();
        assert!(matches!(
            replace_write(&mut dest, update.clone(), false),
            Err(EtlError::DeleteMismatch {
                requested: 1,
                matched: 2,
                ..
            })
        ));

        // both twins go, one replacement comes in
        let mut dest = with_twin();
        let drift = replace_write(&mut dest, update, true).unwrap();
        assert_eq!(drift, 1);
        assert_eq!(dest.count().unwrap(), 5);
    }

    /// Deletes one extra row whenever rows are inserted, like a competing writer
    struct RacingStore(MemoryStore);

    impl RecordStore for RacingStore {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn fields(&self) -> Result<Vec<FieldInfo>> {
            self.0.fields()
        }
        fn count(&self) -> Result<usize> {
            self.0.count()
        }
        fn keys(&self) -> Result<Vec<Key>> {
            self.0.keys()
        }
        fn iterate(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
            self.0.iterate(filter)
        }
        fn bulk_insert(&mut self, records: Vec<Record>) -> Result<usize> {
            let written = self.0.bulk_insert(records)?;
            self.0.delete(&[Key::Int(1)])?;
            Ok(written)
        }
        fn delete(&mut self, keys: &[Key]) -> Result<usize> {
            self.0.delete(keys)
        }
        fn clear(&mut self) -> Result<usize> {
            self.0.clear()
        }
    }

    #[test]
    fn test_concurrent_writer_detected_as_drift() {
        let mut dest = RacingStore(store());
        let modified = dest.iterate(&RecordFilter::Keys(vec![Key::Int(3)])).unwrap();
        match replace_write(&mut dest, modified.clone(), false) {
            Err(EtlError::IntegrityDrift { before, after, .. }) => {
                assert_eq!(before, 5);
                assert_eq!(after, 4);
            }
            other => panic!("expected drift, got {:?}", other),
        }

        let mut dest = RacingStore(store());
        assert_eq!(replace_write(&mut dest, modified, true).unwrap(), 1);
    }
}
