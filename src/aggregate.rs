// ABOUTME: Grouped record counts: rows per distinct field value and rows per calendar date
// ABOUTME: Scans the store batch by batch and keeps only the running tallies in memory

use crate::error::{EtlError, Result};
use crate::partition::partition;
use crate::record::Record;
use crate::store::{RecordFilter, RecordStore};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Order of the groups returned by [`count_in_category`] and [`count_in_date`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountOrder {
    /// Largest group first
    #[default]
    Descending,
    Ascending,
    /// By the grouped value itself
    ByValue,
}

#[derive(Debug, Clone)]
pub struct CountOptions {
    /// Only records matching this filter are counted
    pub filter: RecordFilter,
    pub order: CountOrder,
    /// Keep at most this many groups, after ordering
    pub limit: Option<usize>,
    pub batch_len: usize,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            filter: RecordFilter::All,
            order: CountOrder::default(),
            limit: None,
            batch_len: 1000,
        }
    }
}

/// One group and the number of records in it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCount {
    pub value: Value,
    pub count: usize,
}

/// Count the records of `store` for each distinct value of `field`.
///
/// Strings are trimmed before grouping, so `"red"` and `" red "` share a group.
/// Nulls form a group of their own. An empty store yields no groups.
///
/// # Examples
///
/// ```
/// # use tabular_etl::aggregate::{count_in_category, CountOptions};
/// # use tabular_etl::record::{Key, Record};
/// # use tabular_etl::store::MemoryStore;
/// # use serde_json::json;
/// let records = ["red", "blue", "red"]
///     .iter()
///     .enumerate()
///     .map(|(i, c)| Record::new(Some(Key::Int(i as i64))).with_field("color", *c))
///     .collect();
/// let store = MemoryStore::with_records("paint", vec![], records);
///
/// let counts = count_in_category(&store, "color", &CountOptions::default())?;
/// assert_eq!(counts[0].value, json!("red"));
/// assert_eq!(counts[0].count, 2);
/// # Ok::<(), tabular_etl::error::EtlError>(())
/// ```
pub fn count_in_category<S: RecordStore + ?Sized>(
    store: &S,
    field: &str,
    options: &CountOptions,
) -> Result<Vec<GroupCount>> {
    let tallies = tally(store, options, |record| Some(category(record.get(field))))?;
    Ok(finish(tallies, options))
}

/// Count the records of `store` per calendar date of `field`.
///
/// Dates and timestamps are binned on their leading `YYYY-MM-DD`; values without
/// one (including nulls) are left out of every bin.
pub fn count_in_date<S: RecordStore + ?Sized>(
    store: &S,
    field: &str,
    options: &CountOptions,
) -> Result<Vec<GroupCount>> {
    let mut undated = 0usize;
    let tallies = tally(store, options, |record| {
        let day = date_bin(record.get(field));
        if day.is_none() {
            undated += 1;
        }
        day.map(Value::String)
    })?;
    if undated > 0 {
        tracing::debug!("{} record(s) of '{}' have no date in '{}'", undated, store.name(), field);
    }
    Ok(finish(tallies, options))
}

fn tally<S, F>(store: &S, options: &CountOptions, mut group: F) -> Result<BTreeMap<String, GroupCount>>
where
    S: RecordStore + ?Sized,
    F: FnMut(&Record) -> Option<Value>,
{
    let mut tallies: BTreeMap<String, GroupCount> = BTreeMap::new();
    let batches = match partition(store, options.batch_len) {
        Ok(batches) => batches,
        Err(EtlError::EmptySource { .. }) => return Ok(tallies),
        Err(e) => return Err(e),
    };
    let mut previous_high = None;
    for batch in batches {
        let batch = batch?;
        for record in batch.new_records(previous_high.as_ref()) {
            if !options.filter.matches(record) {
                continue;
            }
            if let Some(value) = group(record) {
                tallies
                    .entry(value.to_string())
                    .or_insert_with(|| GroupCount { value, count: 0 })
                    .count += 1;
            }
        }
        previous_high = Some(batch.range.high.clone());
    }
    Ok(tallies)
}

fn finish(tallies: BTreeMap<String, GroupCount>, options: &CountOptions) -> Vec<GroupCount> {
    let mut groups: Vec<GroupCount> = tallies.into_values().collect();
    groups.sort_by(|a, b| {
        let by_value = compare_values(&a.value, &b.value);
        match options.order {
            CountOrder::Descending => b.count.cmp(&a.count).then(by_value),
            CountOrder::Ascending => a.count.cmp(&b.count).then(by_value),
            CountOrder::ByValue => by_value,
        }
    });
    if let Some(limit) = options.limit {
        groups.truncate(limit);
    }
    groups
}

fn category(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

/// Leading `YYYY-MM-DD` of a date or timestamp string
fn date_bin(value: &Value) -> Option<String> {
    let text = value.as_str()?.trim();
    let day = text.get(..10)?;
    let bytes = day.as_bytes();
    let shaped = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    shaped.then(|| day.to_string())
}

/// Total order over JSON scalars: null, booleans, numbers, then text
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Key;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn calls() -> MemoryStore {
        let rows = [
            ("repair", "2014-03-01 09:15:00", "LC60"),
            ("return", "2014-03-01", "LC60"),
            (" repair ", "2014-03-02T10:00:00", "LC52"),
            ("repair", "not a date", "LC60"),
            ("question", "2014-03-02", "LC60"),
        ];
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (kind, when, model))| {
                Record::new(Some(Key::Int(i as i64 + 1)))
                    .with_field("call_type", *kind)
                    .with_field("date_time", *when)
                    .with_field("model", *model)
            })
            .collect();
        MemoryStore::with_records("calls", vec![], records)
    }

    fn counts(groups: &[GroupCount]) -> Vec<(Value, usize)> {
        groups.iter().map(|g| (g.value.clone(), g.count)).collect()
    }

    #[test]
    fn test_count_in_category_descending() {
        let options = CountOptions {
            batch_len: 2,
            ..CountOptions::default()
        };
        let groups = count_in_category(&calls(), "call_type", &options).unwrap();
        assert_eq!(
            counts(&groups),
            vec![(json!("repair"), 3), (json!("question"), 1), (json!("return"), 1)]
        );
    }

    #[test]
    fn test_count_in_category_filtered_and_limited() {
        let options = CountOptions {
            filter: RecordFilter::FieldIn {
                field: "model".into(),
                values: vec![json!("LC60")],
            },
            order: CountOrder::Ascending,
            limit: Some(2),
            ..CountOptions::default()
        };
        let groups = count_in_category(&calls(), "call_type", &options).unwrap();
        assert_eq!(counts(&groups), vec![(json!("question"), 1), (json!("return"), 1)]);
    }

    #[test]
    fn test_count_in_date_bins_timestamps() {
        let options = CountOptions {
            order: CountOrder::ByValue,
            ..CountOptions::default()
        };
        let groups = count_in_date(&calls(), "date_time", &options).unwrap();
        assert_eq!(counts(&groups), vec![(json!("2014-03-01"), 2), (json!("2014-03-02"), 2)]);
    }

    #[test]
    fn test_empty_store_has_no_groups() {
        let store = MemoryStore::new("calls", vec![]);
        assert!(count_in_category(&store, "call_type", &CountOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_compare_values_orders_kinds() {
        assert_eq!(compare_values(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }
}
