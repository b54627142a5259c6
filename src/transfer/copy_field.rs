// ABOUTME: Copies one column into a field of another store, matching rows by key
// ABOUTME: Batches the source by key range and writes updates through replace_write

use super::replace::replace_write;
use crate::error::{EtlError, Result};
use crate::partition::partition;
use crate::progress::job_progress;
use crate::record::{find_field_info, FieldInfo, Key, Record};
use crate::store::{RecordFilter, RecordStore};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CopyFieldOptions {
    /// Source field holding the matching key; `None` matches on the source key
    pub source_key_field: Option<String>,
    /// Destination field holding the matching key; `None` matches on the destination key
    pub dest_key_field: Option<String>,
    /// Replace destination values that are already set (otherwise only nulls are filled)
    pub overwrite: bool,
    /// Skip source rows whose value is null or blank
    pub skip_null: bool,
    pub batch_len: usize,
    pub ignore_errors: bool,
    pub dry_run: bool,
    pub verbosity: u8,
}

impl Default for CopyFieldOptions {
    fn default() -> Self {
        Self {
            source_key_field: None,
            dest_key_field: None,
            overwrite: false,
            skip_null: true,
            batch_len: 1000,
            ignore_errors: false,
            dry_run: false,
            verbosity: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyFieldReport {
    /// Source rows examined
    pub read: usize,
    pub updated: usize,
    /// Source rows with no destination row under the same key
    pub missing: usize,
    /// Source rows skipped for a null/blank value, because the destination was already
    /// set, or because a later source row matched the same destination row
    pub skipped: usize,
    pub drift: i64,
}

/// Copy `src_field` of `source` into `dest_field` of `dest`.
///
/// Strings are stripped and truncated to the destination field's `max_length`.
/// Updated destination rows are rewritten with [`replace_write`], so they receive
/// fresh keys.
///
/// # Errors
///
/// Fails if either field is unknown, the source is empty, or (without
/// `ignore_errors`) a replace-write reports a delete mismatch or drift.
pub fn copy_field<S, D>(
    source: &S,
    src_field: &str,
    dest: &mut D,
    dest_field: &str,
    options: &CopyFieldOptions,
) -> Result<CopyFieldReport>
where
    S: RecordStore + ?Sized,
    D: RecordStore + ?Sized,
{
    let src_info = lookup(&source.fields()?, src_field, source.name())?;
    let dest_info = lookup(&dest.fields()?, dest_field, dest.name())?;

    let batches = partition(source, options.batch_len)?;
    let progress = job_progress(
        batches.plan().total_keys,
        options.verbosity,
        &format!("{}.{} -> {}.{}", source.name(), src_info.name, dest.name(), dest_info.name),
    );
    let mut report = CopyFieldReport::default();

    for batch in batches {
        let batch = batch?;
        report.read += batch.records.len();
        progress.inc(batch.records.len() as u64);

        let mut wanted: Vec<(Key, Value)> = Vec::new();
        for record in &batch.records {
            let Some(key) = match_key(record, options.source_key_field.as_deref()) else {
                report.skipped += 1;
                continue;
            };
            match prepare_value(record.get(&src_info.column), &dest_info) {
                Some(value) => wanted.push((key, value)),
                None if options.skip_null => report.skipped += 1,
                None => wanted.push((key, Value::Null)),
            }
        }
        if wanted.is_empty() {
            continue;
        }

        let targets = find_targets(&*dest, &wanted, options.dest_key_field.as_deref())?;
        let mut updated: Vec<Record> = Vec::new();
        let mut positions: BTreeMap<Key, usize> = BTreeMap::new();
        for (key, value) in wanted {
            let Some(rows) = targets.get(&key) else {
                tracing::debug!("No row in '{}' for key {}", dest.name(), key);
                report.missing += 1;
                continue;
            };
            if rows.len() > 1 {
                tracing::warn!("⚠ {} rows in '{}' share key {}, updating the first", rows.len(), dest.name(), key);
            }
            let mut row = rows[0].clone();
            if !options.overwrite && !row.get(&dest_info.column).is_null() {
                report.skipped += 1;
                continue;
            }
            row.set(&dest_info.column, value);
            if let Some(pk) = row.pk.clone() {
                if let Some(&at) = positions.get(&pk) {
                    tracing::warn!(
                        "⚠ Several source rows match row {} of '{}', keeping the last value",
                        pk,
                        dest.name()
                    );
                    report.skipped += 1;
                    updated[at] = row;
                    continue;
                }
                positions.insert(pk, updated.len());
            }
            updated.push(row);
        }

        report.updated += updated.len();
        if options.verbosity >= 2 {
            tracing::info!(
                "Batch {}: updating {} of {} row(s)",
                batch.index + 1,
                updated.len(),
                batch.records.len()
            );
        }
        if !options.dry_run {
            report.drift += replace_write(dest, updated, options.ignore_errors)?;
        }
    }

    progress.finish_with_message("Copy complete");
    Ok(report)
}

fn lookup(fields: &[FieldInfo], name: &str, store: &str) -> Result<FieldInfo> {
    find_field_info(fields, name)
        .cloned()
        .ok_or_else(|| EtlError::InvalidArgument(format!("'{}' has no field '{}'", store, name)))
}

fn match_key(record: &Record, key_field: Option<&str>) -> Option<Key> {
    match key_field {
        None => record.pk.clone(),
        Some(field) => Key::from_value(record.get(field)),
    }
}

/// Stripped, truncated copy of a source value; `None` for null or blank values
fn prepare_value(value: &Value, dest: &FieldInfo) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            let s: String = match dest.max_length {
                Some(max) => s.chars().take(max).collect(),
                None => s.to_string(),
            };
            Some(Value::String(s))
        }
        other => Some(other.clone()),
    }
}

fn find_targets<D: RecordStore + ?Sized>(
    dest: &D,
    wanted: &[(Key, Value)],
    key_field: Option<&str>,
) -> Result<BTreeMap<Key, Vec<Record>>> {
    let keys: Vec<Key> = wanted.iter().map(|(k, _)| k.clone()).collect();
    let filter = match key_field {
        None => RecordFilter::Keys(keys),
        Some(field) => RecordFilter::FieldIn {
            field: field.to_string(),
            values: keys.iter().map(Key::to_value).collect(),
        },
    };
    let mut targets: BTreeMap<Key, Vec<Record>> = BTreeMap::new();
    for record in dest.iterate(&filter)? {
        if let Some(key) = match_key(&record, key_field) {
            targets.entry(key).or_default().push(record);
        }
    }
    Ok(targets)
}
