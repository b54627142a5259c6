// ABOUTME: Marks duplicate groups: rows sharing a unique-together tuple get a sequence number
// ABOUTME: Groups are ordered by an optional date field; marked rows are rewritten via replace_write

use super::replace::replace_write;
use crate::aggregate::compare_values;
use crate::error::{EtlError, Result};
use crate::partition::{partition, plan_partition};
use crate::progress::job_progress;
use crate::record::{find_field_info, Key, Record};
use crate::store::RecordStore;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct DedupeOptions {
    /// Fields whose combined values should be unique
    pub unique_together: Vec<String>,
    /// Orders the rows within a group, oldest first
    pub date_field: Option<String>,
    /// Receives the row's position within its group, from 0
    pub seq_field: String,
    /// Receives the last position of the row's group
    pub seq_max_field: String,
    /// Leave rows alone whose `seq_max_field` is already set
    pub ignore_existing: bool,
    pub batch_len: usize,
    pub ignore_errors: bool,
    pub dry_run: bool,
    pub verbosity: u8,
}

impl Default for DedupeOptions {
    fn default() -> Self {
        Self {
            unique_together: Vec::new(),
            date_field: None,
            seq_field: "seq".to_string(),
            seq_max_field: "seq_max".to_string(),
            ignore_existing: true,
            batch_len: 1000,
            ignore_errors: false,
            dry_run: false,
            verbosity: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupeReport {
    /// Rows taking part in the grouping
    pub examined: usize,
    pub groups: usize,
    /// Groups of more than one row
    pub duplicate_groups: usize,
    /// Rows in those groups, originals included
    pub duplicates: usize,
    pub updated: usize,
    pub drift: i64,
}

/// Ordering key of one row: its unique-together values, then its date
struct Entry {
    key: Key,
    values: Vec<Value>,
    date: Value,
}

/// Number every row of `store` within its group of rows that share the
/// `unique_together` values.
///
/// Within a group rows are ordered by `date_field` (then by key); the first gets
/// `seq = 0`, and every row of the group gets `seq_max = group size - 1`. A row
/// with no duplicates ends up with `0`/`0`.
///
/// # Errors
///
/// Fails if no unique-together field is given, a named field does not exist, the
/// store is empty, or (without `ignore_errors`) a rewrite reports drift.
pub fn mark_duplicates<D: RecordStore + ?Sized>(dest: &mut D, options: &DedupeOptions) -> Result<DedupeReport> {
    if options.unique_together.is_empty() {
        return Err(EtlError::InvalidArgument(
            "at least one unique-together field is required".to_string(),
        ));
    }
    let fields = dest.fields()?;
    let named = options
        .unique_together
        .iter()
        .chain(options.date_field.iter())
        .chain([&options.seq_field, &options.seq_max_field]);
    for name in named {
        if find_field_info(&fields, name).is_none() {
            return Err(EtlError::InvalidArgument(format!(
                "'{}' has no field '{}'",
                dest.name(),
                name
            )));
        }
    }

    let mut entries = read_entries(&*dest, options)?;
    entries.sort_by(compare_entries);
    let positions = number_groups(&entries);

    let mut report = DedupeReport {
        examined: entries.len(),
        ..DedupeReport::default()
    };
    for &(seq, seq_max) in positions.values() {
        if seq == 0 {
            report.groups += 1;
            if seq_max > 0 {
                report.duplicate_groups += 1;
            }
        }
        if seq_max > 0 {
            report.duplicates += 1;
        }
    }
    tracing::info!(
        "Found {} group(s) in '{}', {} with duplicates",
        report.groups,
        dest.name(),
        report.duplicate_groups
    );

    let plan = plan_partition(&*dest, options.batch_len)?;
    let progress = job_progress(plan.len(), options.verbosity, &format!("marking {}", dest.name()));
    for range in plan.ranges {
        let records = dest.filter_by_key_range(&range.low, &range.high)?;
        let mut changed: Vec<Record> = Vec::new();
        for mut record in records {
            let Some(&(seq, seq_max)) = record.pk.as_ref().and_then(|k| positions.get(k)) else {
                continue;
            };
            let (seq, seq_max) = (json!(seq), json!(seq_max));
            if record.get(&options.seq_field) == &seq && record.get(&options.seq_max_field) == &seq_max {
                continue;
            }
            record.set(&options.seq_field, seq);
            record.set(&options.seq_max_field, seq_max);
            changed.push(record);
        }
        report.updated += changed.len();
        if !options.dry_run && !changed.is_empty() {
            report.drift += replace_write(dest, changed, options.ignore_errors)?;
        }
        progress.inc(1);
    }
    progress.finish_with_message("Marking complete");
    Ok(report)
}

fn read_entries<D: RecordStore + ?Sized>(store: &D, options: &DedupeOptions) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut previous_high: Option<Key> = None;
    for batch in partition(store, options.batch_len)? {
        let batch = batch?;
        for record in batch.new_records(previous_high.as_ref()) {
            let Some(key) = record.pk.clone() else {
                continue;
            };
            if options.ignore_existing && !record.get(&options.seq_max_field).is_null() {
                continue;
            }
            entries.push(Entry {
                key,
                values: options
                    .unique_together
                    .iter()
                    .map(|f| record.get(f).clone())
                    .collect(),
                date: options
                    .date_field
                    .as_ref()
                    .map_or(Value::Null, |f| record.get(f).clone()),
            });
        }
        previous_high = Some(batch.range.high.clone());
    }
    Ok(entries)
}

fn compare_groups(a: &Entry, b: &Entry) -> Ordering {
    a.values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| compare_values(x, y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    compare_groups(a, b)
        .then_with(|| compare_values(&a.date, &b.date))
        .then_with(|| a.key.cmp(&b.key))
}

/// `(seq, seq_max)` of every key, given entries sorted so groups are contiguous
fn number_groups(entries: &[Entry]) -> BTreeMap<Key, (usize, usize)> {
    let mut positions = BTreeMap::new();
    let mut start = 0;
    while start < entries.len() {
        let end = entries[start..]
            .iter()
            .position(|e| compare_groups(e, &entries[start]).is_ne())
            .map_or(entries.len(), |offset| start + offset);
        let seq_max = end - start - 1;
        for (seq, entry) in entries[start..end].iter().enumerate() {
            positions.insert(entry.key.clone(), (seq, seq_max));
        }
        start = end;
    }
    positions
}
