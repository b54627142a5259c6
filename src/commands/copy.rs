// ABOUTME: copy command transferring every record of one table into another
// ABOUTME: Supports append or replace writes, clear policies and checkpointed resume

use super::{open_table, JobArgs};
use crate::config::EtlConfig;
use crate::store::RecordStore;
use crate::transfer::{self, Checkpoint, ClearPolicy, TransferOptions, TransferReport, WriteMode};
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Default)]
pub struct CopyArgs {
    pub clear: ClearPolicy,
    /// Overwrite destination rows sharing a key instead of appending
    pub replace: bool,
    /// Abort on the first record that fails to convert
    pub strict: bool,
    /// Discard any checkpoint left by an interrupted run and start over
    pub no_resume: bool,
}

/// Copy every record of `source` into `destination`.
///
/// Both tables live in the job's database. When the configuration enables
/// checkpoints, progress is saved after each batch and an interrupted copy picks up
/// at the first unwritten batch.
///
/// # Arguments
///
/// * `job` - Database, dry-run, confirmation and verbosity settings
/// * `source` - Table to read, resolved fuzzily
/// * `destination` - Table to write, resolved fuzzily
/// * `args` - Clear policy, write mode and resume behaviour
/// * `config` - Batch size, checkpoint directory and name-resolution settings
///
/// # Errors
///
/// This function will return an error if:
/// - Either table cannot be resolved
/// - The source is empty
/// - A record fails in strict mode, or every record fails
/// - The checkpoint file cannot be read or written
pub fn copy(job: &JobArgs, source: &str, destination: &str, args: &CopyArgs, config: &EtlConfig) -> Result<TransferReport> {
    let src = open_table(&job.db, source, config)?;
    let mut dest = open_table(&job.db, destination, config)?;
    if src.name() == dest.name() {
        bail!("Source and destination are the same table '{}'", src.name());
    }

    let checkpoint = config.checkpoint_path(src.name(), dest.name());
    if let Some(path) = &checkpoint {
        if args.no_resume && path.exists() {
            tracing::info!("Discarding checkpoint {}", path.display());
            Checkpoint::remove(path)?;
        }
    }

    let options = TransferOptions {
        batch_len: job.batch_len(config),
        clear: args.clear,
        dry_run: job.dry_run,
        ignore_errors: !args.strict,
        verbosity: job.verbosity,
        write_mode: if args.replace { WriteMode::Replace } else { WriteMode::Append },
        checkpoint,
        ..TransferOptions::default()
    };

    if job.dry_run {
        tracing::info!("DRY RUN: no changes will be written to '{}'", dest.name());
    }
    let prompt = job.prompt();
    let report = transfer::transfer(&src, &mut dest, &options, None, prompt.as_ref())
        .with_context(|| format!("Failed to copy '{}' into '{}'", src.name(), dest.name()))?;
    if report.all_failed() {
        bail!("Every record of '{}' failed to convert", src.name());
    }
    tracing::info!("✓ Copied {} record(s) into '{}'", report.transferred, dest.name());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldInfo, FieldType, Key, Record};
    use crate::store::{RecordFilter, SqliteStore};
    use crate::transfer::ClearOutcome;
    use rusqlite::Connection;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn two_tables(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("copy.sqlite");
        let fields = [
            FieldInfo::new("name", FieldType::Text),
            FieldInfo::new("score", FieldType::Real),
        ];
        let mut src = SqliteStore::create(Connection::open(&path).unwrap(), "scores_raw", &fields).unwrap();
        let records: Vec<Record> = (1..=12)
            .map(|i| Record::new(Some(Key::Int(i))).with_field("name", format!("n{}", i)).with_field("score", i as f64 / 2.0))
            .collect();
        src.bulk_insert(records).unwrap();
        SqliteStore::create(Connection::open(&path).unwrap(), "scores", &fields).unwrap();
        path
    }

    fn job(db: &Path) -> JobArgs {
        JobArgs {
            db: db.to_path_buf(),
            assume_yes: true,
            verbosity: 0,
            batch_len: Some(5),
            ..JobArgs::default()
        }
    }

    #[test]
    fn test_copy_between_tables() {
        let dir = TempDir::new().unwrap();
        let db = two_tables(&dir);
        let report = copy(&job(&db), "scores_raw", "scores", &CopyArgs::default(), &EtlConfig::default()).unwrap();
        assert_eq!(report.read, 12);
        assert_eq!(report.transferred, 12);
        assert_eq!(report.batches, 3);

        let dest = SqliteStore::open(&db, "scores").unwrap();
        let records = dest.iterate(&RecordFilter::All).unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(records[11].get("name"), &serde_json::json!("n12"));
    }

    #[test]
    fn test_copy_twice_with_clear() {
        let dir = TempDir::new().unwrap();
        let db = two_tables(&dir);
        let config = EtlConfig::default();
        copy(&job(&db), "scores_raw", "scores", &CopyArgs::default(), &config).unwrap();
        let args = CopyArgs {
            clear: ClearPolicy::ClearConfirm,
            ..CopyArgs::default()
        };
        let report = copy(&job(&db), "scores_raw", "scores", &args, &config).unwrap();
        assert_eq!(report.clear, ClearOutcome::Cleared(12));
        assert_eq!(SqliteStore::open(&db, "scores").unwrap().count().unwrap(), 12);
    }

    #[test]
    fn test_copy_rejects_same_table() {
        let dir = TempDir::new().unwrap();
        let db = two_tables(&dir);
        assert!(copy(&job(&db), "scores", "scores", &CopyArgs::default(), &EtlConfig::default()).is_err());
    }

    #[test]
    fn test_no_resume_discards_checkpoint() {
        let dir = TempDir::new().unwrap();
        let db = two_tables(&dir);
        let config = EtlConfig {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            ..EtlConfig::default()
        };
        let path = config.checkpoint_path("scores_raw", "scores").unwrap();
        std::fs::write(&path, "{\"stale\": true}").unwrap();

        let args = CopyArgs {
            no_resume: true,
            ..CopyArgs::default()
        };
        let report = copy(&job(&db), "scores_raw", "scores", &args, &config).unwrap();
        assert_eq!(report.resumed_from, None);
        assert_eq!(report.transferred, 12);
        assert!(!path.exists());
    }
}
