// ABOUTME: diff command comparing a table against another record by record
// ABOUTME: Prints the human summary through tracing and optionally writes the report as JSON

use super::{open_table, resolve_field, resolve_fields, JobArgs};
use crate::config::EtlConfig;
use crate::diff::{self, DiffOptions, DiffReport, RelatedMode};
use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct DiffArgs {
    /// Field identifying matching rows instead of the key
    pub key_field: Option<String>,
    /// Fields to compare; empty compares every shared field
    pub fields: Vec<String>,
    pub ignore: Vec<String>,
    /// Skip foreign-key fields
    pub ignore_related: bool,
    pub short_circuit: bool,
    /// Sample size; `Some(0)` compares everything
    pub limit: Option<usize>,
    pub seed: Option<u64>,
    /// Write the full report here as JSON
    pub json: Option<PathBuf>,
}

/// Compare `source` against `destination` and report every difference.
///
/// # Errors
///
/// Fails when a table or field cannot be resolved, the source is empty, or the JSON
/// report cannot be written.
pub fn diff(job: &JobArgs, source: &str, destination: &str, args: &DiffArgs, config: &EtlConfig) -> Result<DiffReport> {
    let src = open_table(&job.db, source, config)?;
    let dest = open_table(&job.db, destination, config)?;

    let field_names = if args.fields.is_empty() {
        None
    } else {
        Some(resolve_fields(&src, &args.fields, config)?)
    };
    let key_field = args
        .key_field
        .as_deref()
        .map(|f| resolve_field(&src, f, config))
        .transpose()?;
    let defaults = DiffOptions::default();
    let limit = match args.limit {
        Some(0) => None,
        Some(n) => Some(n),
        None => defaults.limit,
    };

    let options = DiffOptions {
        key_field,
        field_names,
        ignore_fields: args.ignore.clone(),
        related: if args.ignore_related {
            RelatedMode::Ignore
        } else {
            RelatedMode::ForeignKey
        },
        nulls: config.diff_nulls.clone(),
        short_circuit: args.short_circuit,
        limit,
        batch_len: job.batch_len.unwrap_or(config.diff_batch_len),
        seed: args.seed,
        verbosity: job.verbosity,
        ..defaults
    };

    let report = diff::diff(&src, &dest, &options)
        .with_context(|| format!("Failed to diff '{}' against '{}'", source, destination))?;

    if let Some(path) = &args.json {
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("✓ Wrote diff report to {}", path.display());
    }
    Ok(report)
}
