// ABOUTME: fingerprint command listing or comparing SHA-256 content fingerprints of tables
// ABOUTME: Comparison ignores keys, so rekeyed copies of the same data validate

use super::{open_table, JobArgs};
use crate::config::EtlConfig;
use crate::fingerprint::{compare_fingerprints, fingerprint_store, FingerprintComparison};
use crate::record::Key;
use anyhow::{bail, Context, Result};

/// What the fingerprint command produced
#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintOutcome {
    /// `(key, fingerprint)` of every record of one table
    Listed(Vec<(Key, String)>),
    Compared(FingerprintComparison),
}

/// Fingerprint `table`, or compare it against `other` when given.
///
/// # Errors
///
/// Fails if a table cannot be resolved or read, and when a comparison finds the
/// two tables differ.
pub fn fingerprint(
    job: &JobArgs,
    table: &str,
    other: Option<&str>,
    ignore: &[String],
    config: &EtlConfig,
) -> Result<FingerprintOutcome> {
    let store = open_table(&job.db, table, config)?;
    let batch_len = job.batch_len(config);

    let Some(other) = other else {
        let fingerprints = fingerprint_store(&store, batch_len, ignore)
            .with_context(|| format!("Failed to fingerprint '{}'", table))?;
        tracing::info!("✓ Fingerprinted {} record(s)", fingerprints.len());
        return Ok(FingerprintOutcome::Listed(fingerprints));
    };

    let dest = open_table(&job.db, other, config)?;
    let comparison = compare_fingerprints(&store, &dest, batch_len, ignore)
        .with_context(|| format!("Failed to compare '{}' and '{}'", table, other))?;

    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Fingerprint comparison");
    tracing::info!("========================================");
    tracing::info!("  Source:      {} ({} rows)", comparison.source, comparison.source_row_count);
    tracing::info!(
        "  Destination: {} ({} rows)",
        comparison.destination,
        comparison.destination_row_count
    );
    if comparison.is_valid() {
        tracing::info!("✓ Contents match");
        return Ok(FingerprintOutcome::Compared(comparison));
    }
    tracing::warn!("  ⚠ Only in source:      {}", comparison.only_in_source);
    tracing::warn!("  ⚠ Only in destination: {}", comparison.only_in_destination);
    bail!(
        "Contents of '{}' and '{}' differ: {} source and {} destination record(s) unmatched",
        comparison.source,
        comparison.destination,
        comparison.only_in_source,
        comparison.only_in_destination
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldInfo, FieldType, Record};
    use crate::store::{RecordStore, SqliteStore};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn db_with(dir: &TempDir, extra: Option<&str>) -> std::path::PathBuf {
        let db = dir.path().join("fp.sqlite");
        let fields = [FieldInfo::new("word", FieldType::Text)];
        let mut a = SqliteStore::create(Connection::open(&db).unwrap(), "words", &fields).unwrap();
        a.bulk_insert(vec![
            Record::new(None).with_field("word", "alpha"),
            Record::new(None).with_field("word", "beta"),
        ])
        .unwrap();
        let mut b = SqliteStore::create(Connection::open(&db).unwrap(), "words_copy", &fields).unwrap();
        let mut copy = vec![
            Record::new(None).with_field("word", "beta"),
            Record::new(None).with_field("word", "alpha"),
        ];
        if let Some(word) = extra {
            copy.push(Record::new(None).with_field("word", word));
        }
        b.bulk_insert(copy).unwrap();
        db
    }

    fn job(db: std::path::PathBuf) -> JobArgs {
        JobArgs {
            db,
            ..JobArgs::default()
        }
    }

    #[test]
    fn test_list_and_compare() {
        let dir = TempDir::new().unwrap();
        let db = db_with(&dir, None);
        let config = EtlConfig::default();
        match fingerprint(&job(db.clone()), "words", None, &[], &config).unwrap() {
            FingerprintOutcome::Listed(list) => assert_eq!(list.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match fingerprint(&job(db), "words", Some("words_copy"), &[], &config).unwrap() {
            FingerprintOutcome::Compared(c) => assert!(c.is_valid()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_difference_is_an_error() {
        let dir = TempDir::new().unwrap();
        let db = db_with(&dir, Some("gamma"));
        let err = fingerprint(&job(db), "words", Some("words_copy"), &[], &EtlConfig::default()).unwrap_err();
        assert!(err.to_string().contains("differ"));
    }
}
