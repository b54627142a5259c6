// ABOUTME: dedupe command numbering rows that share a unique-together tuple
// ABOUTME: Writes seq/seq_max marks so duplicates can be reviewed or filtered later

use super::{open_table, resolve_field, resolve_fields, JobArgs};
use crate::config::EtlConfig;
use crate::store::RecordStore;
use crate::transfer::{self, DedupeOptions, DedupeReport};
use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct DedupeArgs {
    /// Fields that together should identify one row
    pub unique: Vec<String>,
    pub date_field: Option<String>,
    pub seq_field: String,
    pub seq_max_field: String,
    /// Renumber rows that were already marked
    pub recompute: bool,
    pub strict: bool,
}

impl Default for DedupeArgs {
    fn default() -> Self {
        Self {
            unique: Vec::new(),
            date_field: None,
            seq_field: "seq".to_string(),
            seq_max_field: "seq_max".to_string(),
            recompute: false,
            strict: false,
        }
    }
}

/// Mark duplicate rows of `table`
pub fn dedupe(job: &JobArgs, table: &str, args: &DedupeArgs, config: &EtlConfig) -> Result<DedupeReport> {
    let mut store = open_table(&job.db, table, config)?;
    let unique_together = resolve_fields(&store, &args.unique, config)?;
    let date_field = args
        .date_field
        .as_deref()
        .map(|f| resolve_field(&store, f, config))
        .transpose()?;
    let options = DedupeOptions {
        unique_together,
        date_field,
        seq_field: resolve_field(&store, &args.seq_field, config)?,
        seq_max_field: resolve_field(&store, &args.seq_max_field, config)?,
        ignore_existing: !args.recompute,
        batch_len: job.batch_len(config),
        ignore_errors: !args.strict,
        dry_run: job.dry_run,
        verbosity: job.verbosity,
    };

    tracing::info!(
        "Marking duplicates of ({}) in '{}'...",
        options.unique_together.join(", "),
        store.name()
    );
    if job.dry_run {
        tracing::info!("DRY RUN: no changes will be written to '{}'", store.name());
    }
    let report = transfer::mark_duplicates(&mut store, &options)
        .with_context(|| format!("Failed to mark duplicates in '{}'", store.name()))?;

    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Duplicate marking summary");
    tracing::info!("========================================");
    tracing::info!("  Rows examined:     {}", report.examined);
    tracing::info!("  Groups:            {}", report.groups);
    tracing::info!("  Duplicate groups:  {}", report.duplicate_groups);
    tracing::info!("  Rows updated:      {}", report.updated);
    if report.drift != 0 {
        tracing::warn!("  ⚠ Row count drift: {}", report.drift);
    }
    Ok(report)
}
