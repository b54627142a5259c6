// ABOUTME: Batched transfer engine moving records from a source into a destination store
// ABOUTME: Applies clear policy, dry-run, per-record transforms, replace/append writes and checkpoints

pub mod checkpoint;
pub mod convert;
pub mod copy_field;
pub mod dedupe;
pub mod replace;

pub use checkpoint::Checkpoint;
pub use convert::{record_from_row, ConvertError, ImportHook, RowOptions};
pub use copy_field::{copy_field, CopyFieldOptions, CopyFieldReport};
pub use dedupe::{mark_duplicates, DedupeOptions, DedupeReport};
pub use replace::replace_write;

use crate::error::{EtlError, Result};
use crate::interactive::Prompt;
use crate::partition::{chunked, plan_partition, plan_partition_after, BatchPlan, Batches};
use crate::progress::job_progress;
use crate::record::{FieldInfo, Key, Record, Row};
use crate::store::RecordStore;
use std::path::PathBuf;

/// What to do with rows already in the destination before a job starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    #[default]
    Keep,
    Clear,
    /// Clear only after an explicit "yes" from the prompt
    ClearConfirm,
}

/// What actually happened to the destination's existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    NotRequested,
    Cleared(usize),
    /// Dry run: this many rows would have been deleted
    SkippedDryRun(usize),
    Declined,
    /// A resumed job never clears; the interrupted run already did
    SkippedResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Insert converted records as new rows
    #[default]
    Append,
    /// Replace the destination rows that share each record's key, see [`replace_write`]
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferOptions {
    pub batch_len: usize,
    pub clear: ClearPolicy,
    /// Read, convert and report everything but write nothing
    pub dry_run: bool,
    /// Skip records that fail to convert instead of aborting the job
    pub ignore_errors: bool,
    /// 0 silent, 1 progress bar, 2 per-batch lines, 3 per-record lines
    pub verbosity: u8,
    pub write_mode: WriteMode,
    pub row: RowOptions,
    /// Checkpoint file for resuming an interrupted store-to-store transfer
    pub checkpoint: Option<PathBuf>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_len: 1000,
            clear: ClearPolicy::Keep,
            dry_run: false,
            ignore_errors: true,
            verbosity: 1,
            write_mode: WriteMode::Append,
            row: RowOptions::default(),
            checkpoint: None,
        }
    }
}

/// A record that could not be converted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Position of the record in the job's input
    pub index: usize,
    pub key: Option<Key>,
    pub reason: String,
}

impl From<RecordFailure> for EtlError {
    fn from(failure: RecordFailure) -> Self {
        EtlError::TransformFailure {
            index: failure.index,
            key: failure.key,
            reason: failure.reason,
        }
    }
}

/// Outcome of a transfer or import job
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    /// Records read from the source
    pub read: usize,
    /// Records written, or that would have been written in a dry run
    pub transferred: usize,
    pub failed: Vec<RecordFailure>,
    /// Batches processed by this run
    pub batches: usize,
    pub clear: ClearOutcome,
    /// Accumulated `rows_before - rows_after` of replace writes
    pub drift: i64,
    pub dry_run: bool,
    /// First batch processed when the job resumed from a checkpoint
    pub resumed_from: Option<usize>,
}

impl TransferReport {
    pub fn new(clear: ClearOutcome, dry_run: bool) -> Self {
        Self {
            read: 0,
            transferred: 0,
            failed: Vec::new(),
            batches: 0,
            clear,
            drift: 0,
            dry_run,
            resumed_from: None,
        }
    }

    /// Fold the report of a later job over the same destination into this one
    pub fn merge(&mut self, other: TransferReport) {
        let offset = self.read;
        self.failed.extend(other.failed.into_iter().map(|mut f| {
            f.index += offset;
            f
        }));
        self.read += other.read;
        self.transferred += other.transferred;
        self.batches += other.batches;
        self.drift += other.drift;
    }

    /// Nothing was transferred although records were read
    pub fn all_failed(&self) -> bool {
        self.read > 0 && self.transferred == 0 && !self.failed.is_empty()
    }

    pub(crate) fn log_summary(&self, destination: &str) {
        let prefix = if self.dry_run { "DRY RUN: " } else { "" };
        tracing::info!("");
        tracing::info!("========================================");
        tracing::info!("{}Transfer into '{}'", prefix, destination);
        tracing::info!("========================================");
        tracing::info!("  Records read:        {}", self.read);
        tracing::info!("  Records transferred: {}", self.transferred);
        if let Some(batch) = self.resumed_from {
            tracing::info!("  Resumed at batch:    {}", batch + 1);
        }
        if !self.failed.is_empty() {
            tracing::warn!("  ⚠ Records skipped:   {}", self.failed.len());
        }
        if self.drift != 0 {
            tracing::warn!("  ⚠ Row count drift:   {}", self.drift);
        }
        if self.all_failed() {
            tracing::warn!("⚠ Every record failed to convert");
        }
    }
}

/// Converts records and writes them batch by batch, accumulating the report
struct BatchWriter<'a, D: RecordStore + ?Sized> {
    dest: &'a mut D,
    fields: Vec<FieldInfo>,
    options: &'a TransferOptions,
    row_options: RowOptions,
    hook: Option<&'a dyn ImportHook>,
    report: TransferReport,
}

impl<'a, D: RecordStore + ?Sized> BatchWriter<'a, D> {
    fn new(
        dest: &'a mut D,
        options: &'a TransferOptions,
        hook: Option<&'a dyn ImportHook>,
        clear: ClearOutcome,
    ) -> Result<Self> {
        let fields = dest.fields()?;
        let mut row_options = options.row.clone();
        row_options.strict |= !options.ignore_errors;
        if options.write_mode == WriteMode::Replace {
            row_options.include_pk = true;
        }
        Ok(Self {
            dest,
            fields,
            options,
            row_options,
            hook,
            report: TransferReport::new(clear, options.dry_run),
        })
    }

    /// Hook first, generic conversion as fallback; `None` for a skipped record
    fn convert(&mut self, row: &Row, key: Option<&Key>) -> Result<Option<Record>> {
        let index = self.report.read;
        self.report.read += 1;

        if let Some(hook) = self.hook {
            match hook.import_row(row, &self.fields) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => tracing::debug!(
                    "Import hook failed on record #{}: {}, using field mapping",
                    index,
                    e
                ),
            }
        }

        match record_from_row(row, &self.fields, &self.row_options) {
            Ok(record) => {
                if self.options.verbosity >= 3 {
                    tracing::debug!("Record #{}: {:?}", index, record.fields);
                }
                Ok(Some(record))
            }
            Err(e) => {
                let failure = RecordFailure {
                    index,
                    key: key.cloned(),
                    reason: e.to_string(),
                };
                if !self.options.ignore_errors {
                    return Err(failure.into());
                }
                tracing::warn!("⚠ Skipping record #{}: {}", index, failure.reason);
                self.report.failed.push(failure);
                Ok(None)
            }
        }
    }

    fn write_batch(&mut self, index: usize, total: Option<usize>, records: Vec<Record>) -> Result<()> {
        self.report.batches += 1;
        let count = records.len();
        if self.options.verbosity >= 2 {
            let of_total = total.map(|t| format!("/{}", t)).unwrap_or_default();
            tracing::info!(
                "{}Writing {} record(s) in batch {}{} to '{}'",
                if self.options.dry_run { "DRY RUN: " } else { "" },
                count,
                index + 1,
                of_total,
                self.dest.name()
            );
        }
        if self.options.dry_run {
            self.report.transferred += count;
            return Ok(());
        }
        match self.options.write_mode {
            WriteMode::Append => {
                self.report.transferred += self.dest.bulk_insert(records)?;
            }
            WriteMode::Replace => {
                self.report.drift += replace_write(&mut *self.dest, records, self.options.ignore_errors)?;
                self.report.transferred += count;
            }
        }
        Ok(())
    }
}

/// Copy every record of `source` into `dest`, batch by batch.
///
/// The source is partitioned by key range into batches of at most
/// `options.batch_len`. Each record is converted for the destination's schema
/// (through `hook` when given), and each batch is written with one bulk call. With
/// a checkpoint path set, progress is saved after every batch and a rerun of the
/// same job resumes where the interrupted one stopped.
///
/// # Arguments
///
/// * `source` - Store to read from
/// * `dest` - Store to write into
/// * `options` - Batch size, clear policy, dry-run, strictness and write mode
/// * `hook` - Optional custom per-record import
/// * `prompt` - Answers the confirmation of [`ClearPolicy::ClearConfirm`]
///
/// # Returns
///
/// A [`TransferReport`]; in a dry run `transferred` counts what would have been written.
///
/// # Errors
///
/// This function will return an error if:
/// - The source has no keyed records ([`EtlError::EmptySource`])
/// - A record fails to convert and `ignore_errors` is unset
/// - A replace write detects drift and `ignore_errors` is unset
/// - A store or checkpoint operation fails
///
/// # Examples
///
/// ```
/// # use tabular_etl::interactive::FixedAnswer;
/// # use tabular_etl::record::{FieldInfo, FieldType, Key, Record};
/// # use tabular_etl::store::{MemoryStore, RecordStore};
/// # use tabular_etl::transfer::{transfer, TransferOptions};
/// let fields = vec![FieldInfo::new("v", FieldType::Integer)];
/// let records = (1..=25)
///     .map(|i| Record::new(Some(Key::Int(i))).with_field("v", i))
///     .collect();
/// let source = MemoryStore::with_records("src", fields.clone(), records);
/// let mut dest = MemoryStore::new("dst", fields);
///
/// let options = TransferOptions { batch_len: 10, verbosity: 0, ..TransferOptions::default() };
/// let report = transfer(&source, &mut dest, &options, None, &FixedAnswer(false))?;
/// assert_eq!(report.transferred, 25);
/// assert_eq!(report.batches, 3);
/// assert_eq!(dest.count()?, 25);
/// # Ok::<(), tabular_etl::error::EtlError>(())
/// ```
pub fn transfer<S, D>(
    source: &S,
    dest: &mut D,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport>
where
    S: RecordStore + ?Sized,
    D: RecordStore + ?Sized,
{
    tracing::info!("Transferring '{}' into '{}'...", source.name(), dest.name());
    let mut plan = plan_partition(source, options.batch_len)?;

    let checkpoint_path = if options.dry_run {
        None
    } else {
        options.checkpoint.as_deref()
    };
    let mut checkpoint = Checkpoint::new(source.name(), dest.name(), &plan);
    if let Some(path) = checkpoint_path {
        match Checkpoint::load(path)? {
            Some(saved) if saved.matches(source.name(), dest.name(), &plan) => {
                tracing::info!(
                    "Resuming from checkpoint: {}/{} batch(es) already written",
                    saved.completed_batches,
                    plan.len()
                );
                checkpoint = saved;
            }
            Some(saved) if saved.same_job(source.name(), dest.name(), options.batch_len) => {
                // Source keys changed since the interrupted run: keep its written
                // ranges and re-plan only the keys after the last one it committed
                if let Some(high) = saved.last_high().cloned() {
                    tracing::warn!(
                        "⚠ '{}' changed since checkpoint {}; resuming after key {}",
                        source.name(),
                        path.display(),
                        high
                    );
                    let tail = plan_partition_after(source, options.batch_len, &high)?;
                    plan = BatchPlan::resumed(saved.completed.clone(), tail);
                }
                checkpoint = saved;
            }
            Some(_) => tracing::warn!(
                "⚠ Ignoring checkpoint {}: it belongs to a different job or batch plan",
                path.display()
            ),
            None => {}
        }
    }
    let total = plan.len();
    checkpoint.total_batches = total;
    let resume_at = checkpoint.completed_batches;

    let clear = if resume_at > 0 {
        ClearOutcome::SkippedResume
    } else {
        clear_store(dest, options.clear, options.dry_run, options.batch_len, prompt)?
    };

    let destination = dest.name().to_string();
    let mut writer = BatchWriter::new(dest, options, hook, clear)?;
    if resume_at > 0 {
        writer.report.resumed_from = Some(resume_at);
        writer.report.transferred = checkpoint.transferred;
    }

    let progress = job_progress(total, options.verbosity, &format!("{} -> {}", source.name(), destination));
    progress.set_position(resume_at as u64);

    for batch in Batches::new(source, plan).resume_at(resume_at) {
        let batch = batch?;
        let mut converted = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            if let Some(mut out) = writer.convert(&record.to_row(), record.pk.as_ref())? {
                if options.write_mode == WriteMode::Replace {
                    out.pk = record.pk.clone();
                }
                converted.push(out);
            }
        }
        writer.write_batch(batch.index, Some(total), converted)?;
        progress.inc(1);

        if let Some(path) = checkpoint_path {
            checkpoint.record_batch(batch.range.clone(), writer.report.transferred);
            checkpoint.save(path)?;
        }
    }
    progress.finish_with_message("Transfer complete");

    if let Some(path) = checkpoint_path {
        Checkpoint::remove(path)?;
    }

    let report = writer.report;
    report.log_summary(&destination);
    Ok(report)
}

/// Import an already-parsed row stream into `dest` in batches of `options.batch_len`.
///
/// Blank rows are skipped without counting. Row streams have no stable key plan,
/// so checkpoints are not used here. In [`WriteMode::Replace`] the key is read from
/// each row.
///
/// # Errors
///
/// Same as [`transfer`], except that an empty stream is not an error: the report
/// then has `read == 0`.
pub fn import_rows<I, D>(
    rows: I,
    dest: &mut D,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport>
where
    I: IntoIterator<Item = Row>,
    D: RecordStore + ?Sized,
{
    import_row_stream(rows.into_iter().map(Ok), dest, options, hook, prompt)
}

/// [`import_rows`] over a fallible stream, such as rows parsed lazily from a file.
///
/// The first stream error aborts the job; batches written before it stay written.
pub fn import_row_stream<I, D>(
    rows: I,
    dest: &mut D,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport>
where
    I: IntoIterator<Item = Result<Row>>,
    D: RecordStore + ?Sized,
{
    tracing::info!("Importing rows into '{}'...", dest.name());
    let clear = clear_store(dest, options.clear, options.dry_run, options.batch_len, prompt)?;
    let destination = dest.name().to_string();
    let mut writer = BatchWriter::new(dest, options, hook, clear)?;

    let rows = rows.into_iter();
    let (low, high) = rows.size_hint();
    let progress = job_progress(high.unwrap_or(low), options.verbosity, &format!("rows -> {}", destination));

    let mut index = 0;
    for chunk in chunked(rows, options.batch_len) {
        let chunk_len = chunk.len();
        let mut converted = Vec::with_capacity(chunk_len);
        let mut kept = 0;
        for row in chunk {
            let row = row?;
            if row.is_blank() {
                tracing::debug!("Skipping blank row");
                continue;
            }
            kept += 1;
            if let Some(out) = writer.convert(&row, row_key(&row).as_ref())? {
                converted.push(out);
            }
        }
        if kept > 0 {
            writer.write_batch(index, None, converted)?;
            index += 1;
        }
        progress.inc(chunk_len as u64);
    }
    progress.finish_with_message("Import complete");

    let report = writer.report;
    report.log_summary(&destination);
    Ok(report)
}

fn row_key(row: &Row) -> Option<Key> {
    match row {
        Row::Mapping(map) => map.get("pk").or_else(|| map.get("id")).and_then(Key::from_value),
        Row::Sequence(_) => None,
    }
}

/// Apply a clear policy to `dest`.
///
/// A dry run never deletes: it reports how many rows would have gone. With
/// [`ClearPolicy::ClearConfirm`] a "no" keeps the rows and the job continues.
pub fn clear_store<D: RecordStore + ?Sized>(
    dest: &mut D,
    policy: ClearPolicy,
    dry_run: bool,
    batch_len: usize,
    prompt: &dyn Prompt,
) -> Result<ClearOutcome> {
    if policy == ClearPolicy::Keep {
        return Ok(ClearOutcome::NotRequested);
    }
    let existing = dest.count()?;
    if dry_run {
        tracing::info!(
            "DRY RUN: not deleting {} existing record(s) in '{}'",
            existing,
            dest.name()
        );
        return Ok(ClearOutcome::SkippedDryRun(existing));
    }
    if existing == 0 {
        return Ok(ClearOutcome::Cleared(0));
    }
    if policy == ClearPolicy::ClearConfirm {
        let question = format!(
            "Are you sure you want to delete all {} existing records in '{}'?",
            existing,
            dest.name()
        );
        if !prompt.confirm(&question)? {
            tracing::warn!("⚠ Clear declined, keeping {} record(s) in '{}'", existing, dest.name());
            return Ok(ClearOutcome::Declined);
        }
    }
    tracing::warn!("⚠ Deleting {} record(s) from '{}'", existing, dest.name());
    let deleted = delete_in_batches(dest, batch_len)?;
    tracing::info!("✓ Deleted {} record(s) from '{}'", deleted, dest.name());
    Ok(ClearOutcome::Cleared(deleted))
}

/// Delete every row of `store`, at most `batch_len` keys per delete call.
///
/// Rows without a key are removed with a final clear.
pub fn delete_in_batches<S: RecordStore + ?Sized>(store: &mut S, batch_len: usize) -> Result<usize> {
    let mut keys = store.keys()?;
    keys.dedup();
    let mut deleted = 0;
    for (i, chunk) in keys.chunks(batch_len.max(1)).enumerate() {
        deleted += store.delete(chunk)?;
        tracing::debug!("Delete batch {}: {} row(s) so far", i + 1, deleted);
    }
    if store.count()? > 0 {
        deleted += store.clear()?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::FixedAnswer;
    use crate::record::FieldType;
    use crate::store::{MemoryStore, RecordFilter};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn fields() -> Vec<FieldInfo> {
        vec![
            FieldInfo::new("name", FieldType::Text),
            FieldInfo::new("qty", FieldType::Integer),
        ]
    }

    fn source(n: i64) -> MemoryStore {
        let records = (1..=n)
            .map(|i| {
                Record::new(Some(Key::Int(i)))
                    .with_field("name", format!("item{}", i))
                    .with_field("qty", i.to_string())
            })
            .collect();
        MemoryStore::with_records("src", fields(), records)
    }

    fn quiet() -> TransferOptions {
        TransferOptions {
            batch_len: 10,
            verbosity: 0,
            ..TransferOptions::default()
        }
    }

    #[test]
    fn test_transfer_twenty_five_in_three_batches() {
        let mut dest = MemoryStore::new("dst", fields());
        let report = transfer(&source(25), &mut dest, &quiet(), None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.read, 25);
        assert_eq!(report.transferred, 25);
        assert_eq!(report.batches, 3);
        assert_eq!(report.clear, ClearOutcome::NotRequested);
        assert_eq!(dest.count().unwrap(), 25);
        let first = &dest.records()[0];
        assert_eq!(first.get("qty"), &json!(1));
    }

    #[test]
    fn test_empty_source_is_error() {
        let mut dest = MemoryStore::new("dst", fields());
        let empty = MemoryStore::new("src", fields());
        assert!(matches!(
            transfer(&empty, &mut dest, &quiet(), None, &FixedAnswer(true)),
            Err(EtlError::EmptySource { .. })
        ));
    }

    #[test]
    fn test_dry_run_never_mutates_destination() {
        for policy in [ClearPolicy::Keep, ClearPolicy::Clear, ClearPolicy::ClearConfirm] {
            let mut dest = source(4);
            let options = TransferOptions {
                dry_run: true,
                clear: policy,
                ..quiet()
            };
            let report = transfer(&source(12), &mut dest, &options, None, &FixedAnswer(true)).unwrap();
            assert_eq!(dest.count().unwrap(), 4);
            assert_eq!(report.transferred, 12);
            assert!(report.dry_run);
            if policy != ClearPolicy::Keep {
                assert_eq!(report.clear, ClearOutcome::SkippedDryRun(4));
            }
        }
    }

    #[test]
    fn test_clear_confirm() {
        let options = TransferOptions {
            clear: ClearPolicy::ClearConfirm,
            ..quiet()
        };
        let mut dest = source(3);
        let report = transfer(&source(5), &mut dest, &options, None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.clear, ClearOutcome::Declined);
        assert_eq!(dest.count().unwrap(), 8);

        let mut dest = source(3);
        let report = transfer(&source(5), &mut dest, &options, None, &FixedAnswer(true)).unwrap();
        assert_eq!(report.clear, ClearOutcome::Cleared(3));
        assert_eq!(dest.count().unwrap(), 5);
    }

    fn with_bad_qty() -> MemoryStore {
        let mut records: Vec<Record> = source(6).records().to_vec();
        records[2].set("qty", json!("three"));
        MemoryStore::with_records("src", fields(), records)
    }

    #[test]
    fn test_bad_record_skipped_when_lenient() {
        let options = TransferOptions {
            row: RowOptions {
                strict: true,
                ..RowOptions::default()
            },
            ..quiet()
        };
        let mut dest = MemoryStore::new("dst", fields());
        let report = transfer(&with_bad_qty(), &mut dest, &options, None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.read, 6);
        assert_eq!(report.transferred, 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert_eq!(report.failed[0].key, Some(Key::Int(3)));
        assert!(!report.all_failed());
    }

    #[test]
    fn test_bad_record_aborts_when_strict() {
        let options = TransferOptions {
            ignore_errors: false,
            ..quiet()
        };
        let mut dest = MemoryStore::new("dst", fields());
        match transfer(&with_bad_qty(), &mut dest, &options, None, &FixedAnswer(false)) {
            Err(EtlError::TransformFailure { index, key, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(key, Some(Key::Int(3)));
            }
            other => panic!("expected transform failure, got {:?}", other),
        }
    }

    #[test]
    fn test_hook_with_fallback() {
        let hook = |row: &Row, _: &[FieldInfo]| -> Result<Record> {
            let Row::Mapping(map) = row else {
                return Err(EtlError::InvalidArgument("mapping expected".into()));
            };
            match map.get("pk") {
                Some(pk) if pk == &json!(1) => Err(EtlError::InvalidArgument("skip hook".into())),
                _ => Ok(Record::new(None).with_field("name", "hooked").with_field("qty", 0)),
            }
        };
        let mut dest = MemoryStore::new("dst", fields());
        let report = transfer(&source(3), &mut dest, &quiet(), Some(&hook), &FixedAnswer(false)).unwrap();
        assert_eq!(report.transferred, 3);
        let names: Vec<&Value> = dest.records().iter().map(|r| r.get("name")).collect();
        assert_eq!(names, vec![&json!("item1"), &json!("hooked"), &json!("hooked")]);
    }

    #[test]
    fn test_replace_mode_overwrites_in_place() {
        let mut dest = source(5);
        let mut changed: Vec<Record> = source(5).records().to_vec();
        for record in &mut changed {
            record.set("name", json!("renamed"));
        }
        let src = MemoryStore::with_records("src", fields(), changed);
        let options = TransferOptions {
            write_mode: WriteMode::Replace,
            ignore_errors: false,
            ..quiet()
        };
        let report = transfer(&src, &mut dest, &options, None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.drift, 0);
        assert_eq!(report.transferred, 5);
        assert_eq!(dest.count().unwrap(), 5);
        assert!(dest.records().iter().all(|r| r.get("name") == &json!("renamed")));
    }

    /// Fails the bulk insert numbered `fail_on` (1-based), like a crash mid-job
    struct FlakyStore {
        inner: MemoryStore,
        inserts: usize,
        fail_on: Option<usize>,
    }

    impl RecordStore for FlakyStore {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn fields(&self) -> Result<Vec<FieldInfo>> {
            self.inner.fields()
        }
        fn count(&self) -> Result<usize> {
            self.inner.count()
        }
        fn keys(&self) -> Result<Vec<Key>> {
            self.inner.keys()
        }
        fn iterate(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
            self.inner.iterate(filter)
        }
        fn bulk_insert(&mut self, records: Vec<Record>) -> Result<usize> {
            self.inserts += 1;
            if self.fail_on == Some(self.inserts) {
                return Err(EtlError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "killed",
                )));
            }
            self.inner.bulk_insert(records)
        }
        fn delete(&mut self, keys: &[Key]) -> Result<usize> {
            self.inner.delete(keys)
        }
        fn clear(&mut self) -> Result<usize> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_checkpoint_resumes_interrupted_transfer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src__dst.json");
        let options = TransferOptions {
            checkpoint: Some(path.clone()),
            clear: ClearPolicy::Clear,
            ..quiet()
        };
        let src = source(25);
        let mut dest = FlakyStore {
            inner: MemoryStore::new("dst", fields()),
            inserts: 0,
            fail_on: Some(2),
        };

        assert!(transfer(&src, &mut dest, &options, None, &FixedAnswer(true)).is_err());
        let saved = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(saved.completed_batches, 1);
        assert_eq!(saved.transferred, 10);

        dest.fail_on = None;
        let report = transfer(&src, &mut dest, &options, None, &FixedAnswer(true)).unwrap();
        assert_eq!(report.resumed_from, Some(1));
        assert_eq!(report.clear, ClearOutcome::SkippedResume);
        assert_eq!(report.batches, 2);
        assert_eq!(report.transferred, 25);
        assert_eq!(dest.count().unwrap(), 25);
        assert!(!path.exists());
    }

    #[test]
    fn test_resume_after_source_lost_a_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src__dst.json");
        let options = TransferOptions {
            checkpoint: Some(path.clone()),
            ..quiet()
        };
        let mut src = source(25);
        let mut dest = FlakyStore {
            inner: MemoryStore::new("dst", fields()),
            inserts: 0,
            fail_on: Some(2),
        };
        assert!(transfer(&src, &mut dest, &options, None, &FixedAnswer(true)).is_err());

        // still three batches of ten, but the fenceposts now fall on 11 and 21
        src.delete(&[Key::Int(5)]).unwrap();
        dest.fail_on = None;
        let report = transfer(&src, &mut dest, &options, None, &FixedAnswer(true)).unwrap();
        assert_eq!(report.resumed_from, Some(1));
        assert_eq!(report.batches, 2);
        // item5 was written before it was deleted from the source
        assert_eq!(report.transferred, 25);
        assert_eq!(dest.count().unwrap(), 25);

        let mut names: Vec<String> = dest
            .inner
            .records()
            .iter()
            .filter_map(|r| r.get("name").as_str().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 25);
        assert!(names.contains(&"item11".to_string()));
        assert!(names.contains(&"item5".to_string()));
    }

    #[test]
    fn test_dry_run_writes_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        let options = TransferOptions {
            checkpoint: Some(path.clone()),
            dry_run: true,
            ..quiet()
        };
        let mut dest = MemoryStore::new("dst", fields());
        transfer(&source(25), &mut dest, &options, None, &FixedAnswer(false)).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_import_rows_skips_blank_rows() {
        let rows = vec![
            Row::Sequence(vec![json!("a"), json!("1")]),
            Row::Sequence(vec![json!(" "), Value::Null]),
            Row::Sequence(vec![json!("b"), json!("2")]),
        ];
        let mut dest = MemoryStore::new("dst", fields());
        let report = import_rows(rows, &mut dest, &quiet(), None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.read, 2);
        assert_eq!(report.transferred, 2);
        assert_eq!(dest.count().unwrap(), 2);

        let report = import_rows(Vec::new(), &mut dest, &quiet(), None, &FixedAnswer(false)).unwrap();
        assert_eq!(report.read, 0);
        assert!(!report.all_failed());
    }

    #[test]
    fn test_row_stream_error_aborts() {
        let rows = vec![
            Ok(Row::Sequence(vec![json!("a"), json!("1")])),
            Err(EtlError::RaggedInput { min: 1, max: 2 }),
            Ok(Row::Sequence(vec![json!("b"), json!("2")])),
        ];
        let mut dest = MemoryStore::new("dst", fields());
        let options = TransferOptions { batch_len: 1, ..quiet() };
        assert!(matches!(
            import_row_stream(rows, &mut dest, &options, None, &FixedAnswer(false)),
            Err(EtlError::RaggedInput { .. })
        ));
        assert_eq!(dest.count().unwrap(), 1);
    }

    #[test]
    fn test_merge_offsets_failures() {
        let failure = |index| RecordFailure {
            index,
            key: None,
            reason: "bad".into(),
        };
        let mut total = TransferReport::new(ClearOutcome::NotRequested, false);
        total.read = 5;
        total.transferred = 4;
        total.failed.push(failure(1));
        let mut next = TransferReport::new(ClearOutcome::NotRequested, false);
        next.read = 3;
        next.transferred = 2;
        next.batches = 1;
        next.failed.push(failure(0));
        total.merge(next);
        assert_eq!(total.read, 8);
        assert_eq!(total.transferred, 6);
        assert_eq!(total.batches, 1);
        assert_eq!(total.failed[1].index, 5);
    }

    #[test]
    fn test_delete_in_batches_removes_everything() {
        let mut store = source(23);
        store.bulk_insert(vec![Record::new(None)]).unwrap();
        assert_eq!(delete_in_batches(&mut store, 5).unwrap(), 24);
        assert_eq!(store.count().unwrap(), 0);
    }
}
