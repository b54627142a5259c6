// ABOUTME: copy-field command filling one column of a table from a column of another
// ABOUTME: Rows are matched by key or by named key fields; updated rows are rewritten in place

use super::{open_table, resolve_field, JobArgs};
use crate::config::EtlConfig;
use crate::store::RecordStore;
use crate::transfer::{self, CopyFieldOptions, CopyFieldReport};
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default)]
pub struct CopyFieldArgs {
    /// Source field holding the matching key
    pub source_key: Option<String>,
    /// Destination field holding the matching key
    pub dest_key: Option<String>,
    pub overwrite: bool,
    /// Copy null and blank values too
    pub keep_nulls: bool,
    pub strict: bool,
}

/// Copy `source.src_field` into `destination.dest_field`.
///
/// # Errors
///
/// Fails when a table or field cannot be resolved, the source is empty, or in
/// strict mode when the row count drifts during a rewrite.
pub fn copy_field(
    job: &JobArgs,
    source: &str,
    src_field: &str,
    destination: &str,
    dest_field: &str,
    args: &CopyFieldArgs,
    config: &EtlConfig,
) -> Result<CopyFieldReport> {
    let src = open_table(&job.db, source, config)?;
    let mut dest = open_table(&job.db, destination, config)?;
    let src_field = resolve_field(&src, src_field, config)?;
    let dest_field = resolve_field(&dest, dest_field, config)?;
    let source_key_field = args
        .source_key
        .as_deref()
        .map(|f| resolve_field(&src, f, config))
        .transpose()?;
    let dest_key_field = args
        .dest_key
        .as_deref()
        .map(|f| resolve_field(&dest, f, config))
        .transpose()?;

    tracing::info!(
        "Copying '{}.{}' into '{}.{}'...",
        src.name(),
        src_field,
        dest.name(),
        dest_field
    );
    if job.dry_run {
        tracing::info!("DRY RUN: no changes will be written to '{}'", dest.name());
    }

    let options = CopyFieldOptions {
        source_key_field,
        dest_key_field,
        overwrite: args.overwrite,
        skip_null: !args.keep_nulls,
        batch_len: job.batch_len(config),
        ignore_errors: !args.strict,
        dry_run: job.dry_run,
        verbosity: job.verbosity,
    };
    let report = transfer::copy_field(&src, &src_field, &mut dest, &dest_field, &options)
        .with_context(|| format!("Failed to copy '{}' into '{}'", src_field, dest_field))?;

    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Field copy summary");
    tracing::info!("========================================");
    tracing::info!("  Rows read:     {}", report.read);
    tracing::info!("  Rows updated:  {}", report.updated);
    tracing::info!("  Rows skipped:  {}", report.skipped);
    if report.missing > 0 {
        tracing::warn!("  ⚠ No destination row for {} key(s)", report.missing);
    }
    if report.drift != 0 {
        tracing::warn!("  ⚠ Row count drift: {}", report.drift);
    }
    Ok(report)
}
