// ABOUTME: Field-by-field reconciliation of two record stores with staged value normalization
// ABOUTME: Classifies each difference by the normalization level that resolved it (or didn't)

use crate::encoding::{clean_text, replace_nonascii};
use crate::error::{EtlError, Result};
use crate::partition::{BatchPlan, Batches};
use crate::progress::job_progress;
use crate::record::{find_field_info, FieldInfo, Key, Record};
use crate::store::{RecordFilter, RecordStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// How relationship fields take part in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelatedMode {
    /// Compare the foreign-key column (`<name>_id`)
    #[default]
    ForeignKey,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffOptions {
    /// Field identifying matching rows; `None` matches on the record key
    pub key_field: Option<String>,
    /// Fields to compare; `None` compares every field both stores have
    pub field_names: Option<Vec<String>>,
    pub ignore_fields: Vec<String>,
    pub related: RelatedMode,
    pub strip: bool,
    /// Values treated as equal to null
    pub nulls: Vec<Value>,
    pub clean_unicode: bool,
    /// Stop comparing a record at its first mismatching field
    pub short_circuit: bool,
    /// Compare a random sample of this many records when the source is larger
    pub limit: Option<usize>,
    pub batch_len: usize,
    /// Seed for the sample, for reproducible spot checks
    pub seed: Option<u64>,
    pub verbosity: u8,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            key_field: None,
            field_names: None,
            ignore_fields: Vec::new(),
            related: RelatedMode::ForeignKey,
            strip: true,
            nulls: vec![Value::from(0), Value::from(0.0), Value::from("")],
            clean_unicode: true,
            short_circuit: false,
            limit: Some(10_000),
            batch_len: 999,
            seed: None,
            verbosity: 1,
        }
    }
}

/// The normalization step at which two values compared equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldResolution {
    #[default]
    Exact,
    /// One side null, the other a null synonym
    NullEquivalent,
    Stripped,
    /// Equal after repairing mis-decoded text
    CleanUnicode,
    /// Equal once non-ASCII characters are dropped
    Ascii,
    Mismatch,
}

impl FieldResolution {
    pub fn is_match(self) -> bool {
        self != FieldResolution::Mismatch
    }
}

/// Result of comparing one pair of values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldComparison {
    pub resolution: FieldResolution,
    /// Text repair refused one of the values; the originals were compared instead
    pub clean_unicode_error: bool,
    /// Still different after text repair
    pub unicode_mismatch: bool,
    /// Still different after dropping non-ASCII characters
    pub ascii_mismatch: bool,
}

/// Compare two field values, normalizing step by step until they agree.
///
/// Order: loose equality (numbers by value), null equivalence, whitespace strip,
/// text repair, ASCII-only. Only string pairs go past the null check.
///
/// # Examples
///
/// ```
/// # use serde_json::json;
/// # use tabular_etl::diff::{compare_values, DiffOptions, FieldResolution};
/// let options = DiffOptions::default();
/// let cmp = compare_values(&json!("X "), &json!("X"), &options);
/// assert_eq!(cmp.resolution, FieldResolution::Stripped);
/// ```
pub fn compare_values(a: &Value, b: &Value, options: &DiffOptions) -> FieldComparison {
    let mut cmp = FieldComparison::default();
    if loosely_equal(a, b) {
        return cmp;
    }
    let is_null_synonym = |v: &Value| options.nulls.iter().any(|n| loosely_equal(n, v));
    if (a.is_null() && is_null_synonym(b)) || (b.is_null() && is_null_synonym(a)) {
        cmp.resolution = FieldResolution::NullEquivalent;
        return cmp;
    }

    cmp.resolution = FieldResolution::Mismatch;
    let (Value::String(a), Value::String(b)) = (a, b) else {
        return cmp;
    };

    let (mut a, mut b) = (a.clone(), b.clone());
    if options.strip {
        a = a.trim().to_string();
        b = b.trim().to_string();
        if a == b {
            cmp.resolution = FieldResolution::Stripped;
            return cmp;
        }
    }

    if options.clean_unicode {
        match (clean_text(&a), clean_text(&b)) {
            (Ok(ca), Ok(cb)) => {
                a = ca;
                b = cb;
            }
            _ => cmp.clean_unicode_error = true,
        }
        if a == b {
            cmp.resolution = FieldResolution::CleanUnicode;
            return cmp;
        }
        cmp.unicode_mismatch = true;

        if replace_nonascii(&a, "") == replace_nonascii(&b, "") {
            cmp.resolution = FieldResolution::Ascii;
            return cmp;
        }
        cmp.ascii_mismatch = true;
    }
    cmp
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Bool(x), Value::Number(n)) | (Value::Number(n), Value::Bool(x)) => {
            n.as_f64() == Some(if *x { 1.0 } else { 0.0 })
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub key: Key,
    pub fields: Vec<String>,
}

/// (key, column) of a value pair flagged during text normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFlag {
    pub key: Key,
    pub field: String,
}

/// Everything one diff pass found
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    pub source: String,
    pub destination: String,
    /// Columns compared
    pub field_names: Vec<String>,
    pub fields_ignored: Vec<String>,
    /// Keyed records in the source
    pub population: usize,
    /// Whether a random sample was compared instead of every record
    pub sampled: bool,
    /// Source records examined
    pub checked: usize,
    /// Records whose every compared field resolved to a match
    pub matched: usize,
    /// Source keys matching more than one destination row
    pub multiple_returned: Vec<Key>,
    /// Source keys with no destination row
    pub missing: Vec<Key>,
    pub mismatches: Vec<Mismatch>,
    pub clean_unicode_errors: Vec<FieldFlag>,
    pub unicode_mismatches: Vec<FieldFlag>,
    pub ascii_mismatches: Vec<FieldFlag>,
    /// Field comparisons by the level that resolved them
    pub resolutions: BTreeMap<FieldResolution, usize>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.multiple_returned.is_empty() && self.mismatches.is_empty()
    }
}

/// Compare the records of `source` against the rows of `dest` sharing their key.
///
/// When the source holds more than `options.limit` keyed records, a random sample of
/// `limit` keys is compared; otherwise every record is, batch by batch. Destination
/// rows are looked up per batch by key (or by `options.key_field`).
///
/// # Errors
///
/// Returns [`EtlError::EmptySource`] when the source has no keyed records and
/// [`EtlError::InvalidArgument`] for an unknown field name.
///
/// # Examples
///
/// ```
/// # use tabular_etl::diff::{diff, DiffOptions};
/// # use tabular_etl::record::{FieldInfo, FieldType, Key, Record};
/// # use tabular_etl::store::MemoryStore;
/// let fields = vec![FieldInfo::new("a", FieldType::Text)];
/// let source = MemoryStore::with_records("s", fields.clone(), vec![Record::new(Some(Key::Int(1))).with_field("a", "X ")]);
/// let dest = MemoryStore::with_records("d", fields, vec![Record::new(Some(Key::Int(1))).with_field("a", "X")]);
///
/// let report = diff(&source, &dest, &DiffOptions { verbosity: 0, ..DiffOptions::default() })?;
/// assert_eq!(report.matched, 1);
/// assert!(report.mismatches.is_empty());
/// # Ok::<(), tabular_etl::error::EtlError>(())
/// ```
pub fn diff<S, D>(source: &S, dest: &D, options: &DiffOptions) -> Result<DiffReport>
where
    S: RecordStore + ?Sized,
    D: RecordStore + ?Sized,
{
    let source_fields = source.fields()?;
    let dest_fields = dest.fields()?;
    let (columns, ignored) = compared_columns(&source_fields, &dest_fields, options)?;

    let keys = source.keys()?;
    if keys.is_empty() {
        return Err(EtlError::EmptySource {
            store: source.name().to_string(),
        });
    }

    let mut report = DiffReport {
        source: source.name().to_string(),
        destination: dest.name().to_string(),
        field_names: columns.clone(),
        fields_ignored: ignored,
        population: keys.len(),
        ..DiffReport::default()
    };
    tracing::info!(
        "Comparing {} field(s) of '{}' against '{}'",
        columns.len(),
        report.source,
        report.destination
    );

    let batch_len = options.batch_len.max(1);
    match sample_keys(&keys, options.limit, options.seed) {
        Some(sample) => {
            report.sampled = true;
            tracing::info!("Sampling {} of {} record(s)", sample.len(), keys.len());
            let progress = job_progress(sample.len(), options.verbosity, "diff");
            for chunk in sample.chunks(batch_len) {
                let records = source.iterate(&RecordFilter::Keys(chunk.to_vec()))?;
                compare_batch(&records, dest, &columns, options, &mut report)?;
                progress.inc(records.len() as u64);
            }
            progress.finish_with_message("Diff complete");
        }
        None => {
            let plan = BatchPlan::from_sorted_keys(&keys, batch_len)?;
            let progress = job_progress(keys.len(), options.verbosity, "diff");
            for batch in Batches::new(source, plan) {
                let batch = batch?;
                compare_batch(&batch.records, dest, &columns, options, &mut report)?;
                progress.inc(batch.records.len() as u64);
            }
            progress.finish_with_message("Diff complete");
        }
    }

    log_summary(&report);
    Ok(report)
}

/// Columns to compare plus the names that were skipped
fn compared_columns(
    source: &[FieldInfo],
    dest: &[FieldInfo],
    options: &DiffOptions,
) -> Result<(Vec<String>, Vec<String>)> {
    let selected: Vec<&FieldInfo> = match &options.field_names {
        Some(names) => names
            .iter()
            .map(|name| {
                find_field_info(source, name).ok_or_else(|| {
                    EtlError::InvalidArgument(format!("no field named '{}' to compare", name))
                })
            })
            .collect::<Result<_>>()?,
        None => source
            .iter()
            .filter(|f| find_field_info(dest, &f.name).is_some())
            .collect(),
    };

    let mut columns = Vec::new();
    for field in selected {
        if options.ignore_fields.iter().any(|i| i == &field.name || i == &field.column) {
            continue;
        }
        if field.is_related() && options.related == RelatedMode::Ignore {
            continue;
        }
        columns.push(field.column.clone());
    }
    Ok((columns, options.ignore_fields.clone()))
}

/// Sorted random sample of `limit` distinct keys, or `None` to compare everything
fn sample_keys(keys: &[Key], limit: Option<usize>, seed: Option<u64>) -> Option<Vec<Key>> {
    let limit = limit.filter(|&l| l > 0 && l < keys.len())?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut distinct = keys.to_vec();
    distinct.dedup();
    let mut sample: Vec<Key> = distinct.choose_multiple(&mut rng, limit).cloned().collect();
    sample.sort();
    Some(sample)
}

fn match_key(record: &Record, key_field: Option<&str>) -> Option<Key> {
    match key_field {
        None => record.pk.clone(),
        Some(field) => Key::from_value(record.get(field)),
    }
}

fn compare_batch<D: RecordStore + ?Sized>(
    records: &[Record],
    dest: &D,
    columns: &[String],
    options: &DiffOptions,
    report: &mut DiffReport,
) -> Result<()> {
    let key_field = options.key_field.as_deref();
    let keys: Vec<Key> = records.iter().filter_map(|r| match_key(r, key_field)).collect();
    let filter = match key_field {
        None => RecordFilter::Keys(keys),
        Some(field) => RecordFilter::FieldIn {
            field: field.to_string(),
            values: keys.iter().map(Key::to_value).collect(),
        },
    };
    let mut counterparts: BTreeMap<Key, Vec<Record>> = BTreeMap::new();
    for row in dest.iterate(&filter)? {
        if let Some(key) = match_key(&row, key_field) {
            counterparts.entry(key).or_default().push(row);
        }
    }

    for record in records {
        let Some(key) = match_key(record, key_field) else {
            continue;
        };
        report.checked += 1;
        let other = match counterparts.get(&key).map(Vec::as_slice) {
            None | Some([]) => {
                tracing::debug!("Key {} missing from '{}'", key, report.destination);
                report.missing.push(key);
                continue;
            }
            Some([single]) => single,
            Some(_) => {
                tracing::debug!("Key {} matches several rows of '{}'", key, report.destination);
                report.multiple_returned.push(key);
                continue;
            }
        };

        let mut mismatched = Vec::new();
        for column in columns {
            let (a, b) = (record.get(column), other.get(column));
            let cmp = compare_values(a, b, options);
            *report.resolutions.entry(cmp.resolution).or_insert(0) += 1;
            let flag = || FieldFlag {
                key: key.clone(),
                field: column.clone(),
            };
            if cmp.clean_unicode_error {
                report.clean_unicode_errors.push(flag());
            }
            if cmp.unicode_mismatch {
                report.unicode_mismatches.push(flag());
            }
            if cmp.ascii_mismatch {
                report.ascii_mismatches.push(flag());
            }
            if !cmp.resolution.is_match() {
                if options.verbosity >= 3 {
                    tracing::debug!("Mismatch {}.{}: {} != {}", key, column, a, b);
                }
                mismatched.push(column.clone());
                if options.short_circuit {
                    break;
                }
            }
        }

        if mismatched.is_empty() {
            report.matched += 1;
        } else {
            if options.verbosity >= 2 {
                tracing::info!("Record {} differs in: {}", key, mismatched.join(", "));
            }
            report.mismatches.push(Mismatch {
                key,
                fields: mismatched,
            });
        }
    }
    Ok(())
}

fn log_summary(report: &DiffReport) {
    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Diff '{}' -> '{}'", report.source, report.destination);
    tracing::info!("========================================");
    tracing::info!("  Checked:   {} of {}", report.checked, report.population);
    tracing::info!("  Matched:   {}", report.matched);
    if report.is_clean() {
        tracing::info!("✓ No differences found");
        return;
    }
    tracing::warn!("  ⚠ Missing:    {}", report.missing.len());
    tracing::warn!("  ⚠ Duplicated: {}", report.multiple_returned.len());
    tracing::warn!("  ⚠ Mismatched: {}", report.mismatches.len());
}
