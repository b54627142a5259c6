// ABOUTME: Content fingerprints of records and stores using SHA-256
// ABOUTME: Detects changed or missing rows between tables whose keys differ

use crate::error::Result;
use crate::partition::partition;
use crate::record::{Key, Record};
use crate::store::RecordStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex SHA-256 of a record's fields, excluding the key.
///
/// Fields are hashed in name order. Null fields are skipped, so a missing field and a
/// null one fingerprint the same.
///
/// # Examples
///
/// ```
/// # use tabular_etl::fingerprint::record_fingerprint;
/// # use tabular_etl::record::{Key, Record};
/// let a = Record::new(Some(Key::Int(1))).with_field("x", 1).with_field("y", "b");
/// let b = Record::new(Some(Key::Int(9))).with_field("y", "b").with_field("x", 1);
/// assert_eq!(record_fingerprint(&a, &[]), record_fingerprint(&b, &[]));
/// ```
pub fn record_fingerprint(record: &Record, ignore_fields: &[String]) -> String {
    let mut hasher = Sha256::new();
    let mut names: Vec<&String> = record.fields.keys().collect();
    names.sort();
    for name in names {
        if ignore_fields.contains(name) {
            continue;
        }
        let value = record.get(name);
        if value.is_null() {
            continue;
        }
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// `(key, fingerprint)` for every keyed record of `store`, in key order
pub fn fingerprint_store<S: RecordStore + ?Sized>(
    store: &S,
    batch_len: usize,
    ignore_fields: &[String],
) -> Result<Vec<(Key, String)>> {
    tracing::debug!("Fingerprinting '{}'", store.name());
    let mut out = Vec::new();
    let mut previous_high: Option<Key> = None;
    for batch in partition(store, batch_len)? {
        let batch = batch?;
        for record in batch.new_records(previous_high.as_ref()) {
            if let Some(key) = &record.pk {
                out.push((key.clone(), record_fingerprint(record, ignore_fields)));
            }
        }
        previous_high = Some(batch.range.high.clone());
    }
    Ok(out)
}

/// Result of a fingerprint comparison between two stores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintComparison {
    pub source: String,
    pub destination: String,
    /// Digest over the sorted record fingerprints, independent of keys
    pub source_checksum: String,
    pub destination_checksum: String,
    pub source_row_count: usize,
    pub destination_row_count: usize,
    /// Record contents present in the source but not in the destination
    pub only_in_source: usize,
    pub only_in_destination: usize,
}

impl FingerprintComparison {
    /// Returns true if both checksums and row counts match
    pub fn is_valid(&self) -> bool {
        self.source_checksum == self.destination_checksum
            && self.source_row_count == self.destination_row_count
    }
}

fn checksum(fingerprints: &[String]) -> String {
    let mut sorted: Vec<&String> = fingerprints.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for fp in sorted {
        hasher.update(fp.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Compare the record contents of two stores regardless of their keys.
///
/// # Errors
///
/// Fails if either store is empty or cannot be read.
pub fn compare_fingerprints<S, D>(
    source: &S,
    dest: &D,
    batch_len: usize,
    ignore_fields: &[String],
) -> Result<FingerprintComparison>
where
    S: RecordStore + ?Sized,
    D: RecordStore + ?Sized,
{
    tracing::info!("Comparing fingerprints of '{}' and '{}'", source.name(), dest.name());
    let left: Vec<String> = fingerprint_store(source, batch_len, ignore_fields)?
        .into_iter()
        .map(|(_, fp)| fp)
        .collect();
    let right: Vec<String> = fingerprint_store(dest, batch_len, ignore_fields)?
        .into_iter()
        .map(|(_, fp)| fp)
        .collect();

    let mut balance: BTreeMap<&str, i64> = BTreeMap::new();
    for fp in &left {
        *balance.entry(fp.as_str()).or_insert(0) += 1;
    }
    for fp in &right {
        *balance.entry(fp.as_str()).or_insert(0) -= 1;
    }
    let only_in_source = balance.values().filter(|&&n| n > 0).map(|&n| n as usize).sum();
    let only_in_destination = balance.values().filter(|&&n| n < 0).map(|&n| (-n) as usize).sum();

    let comparison = FingerprintComparison {
        source: source.name().to_string(),
        destination: dest.name().to_string(),
        source_checksum: checksum(&left),
        destination_checksum: checksum(&right),
        source_row_count: left.len(),
        destination_row_count: right.len(),
        only_in_source,
        only_in_destination,
    };
    tracing::debug!(
        "Checksums: {} ({} rows) vs {} ({} rows)",
        comparison.source_checksum,
        comparison.source_row_count,
        comparison.destination_checksum,
        comparison.destination_row_count
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::Value;

    fn rec(pk: i64, name: &str) -> Record {
        Record::new(Some(Key::Int(pk))).with_field("name", name).with_field("n", pk % 3)
    }

    #[test]
    fn test_fingerprint_ignores_key_and_nulls() {
        let a = rec(1, "x");
        let mut b = rec(1, "x");
        b.pk = Some(Key::Int(100));
        b.set("extra", Value::Null);
        assert_eq!(record_fingerprint(&a, &[]), record_fingerprint(&b, &[]));
        assert_eq!(record_fingerprint(&a, &[]).len(), 64);

        let c = rec(1, "y");
        assert_ne!(record_fingerprint(&a, &[]), record_fingerprint(&c, &[]));
        assert_eq!(
            record_fingerprint(&a, &["name".to_string()]),
            record_fingerprint(&c, &["name".to_string()])
        );
    }

    #[test]
    fn test_store_fingerprints_skip_boundary_duplicates() {
        let records = vec![rec(1, "a"), rec(2, "b"), rec(2, "b2"), rec(3, "c")];
        let store = MemoryStore::with_records("t", vec![], records);
        let fps = fingerprint_store(&store, 2, &[]).unwrap();
        let keys: Vec<Key> = fps.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Key::Int(1), Key::Int(2), Key::Int(2), Key::Int(3)]);
    }

    #[test]
    fn test_compare_rekeyed_copy() {
        let source = MemoryStore::with_records("s", vec![], (1..=6).map(|i| rec(i, "v")).collect());
        let rekeyed: Vec<Record> = (1..=6).map(|i| {
            let mut r = rec(i, "v");
            r.pk = Some(Key::Int(i + 1000));
            r
        }).collect();
        let dest = MemoryStore::with_records("d", vec![], rekeyed);
        let result = compare_fingerprints(&source, &dest, 4, &[]).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.only_in_source, 0);

        let mut changed = dest.records().to_vec();
        changed[0].set("name", serde_json::json!("other"));
        let dest = MemoryStore::with_records("d", vec![], changed);
        let result = compare_fingerprints(&source, &dest, 4, &[]).unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.only_in_source, 1);
        assert_eq!(result.only_in_destination, 1);
    }
}
