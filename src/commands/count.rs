// ABOUTME: count command tallying the rows of a table per field value or per calendar date
// ABOUTME: An optional field=value filter narrows the rows counted

use super::{open_table, resolve_field, JobArgs};
use crate::aggregate::{self, CountOptions, CountOrder, GroupCount};
use crate::config::EtlConfig;
use crate::store::{RecordFilter, RecordStore};
use anyhow::{Context, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct CountArgs {
    /// Bin on the date part of the field instead of its exact value
    pub by_date: bool,
    /// Only count rows whose `filter_field` holds one of `filter_values`
    pub filter_field: Option<String>,
    pub filter_values: Vec<String>,
    pub order: CountOrder,
    pub limit: Option<usize>,
}

/// Numbers given on the command line compare equal to stored numbers
fn filter_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return json!(i);
    }
    match text.parse::<f64>() {
        Ok(x) if x.is_finite() => json!(x),
        _ => Value::String(text.to_string()),
    }
}

/// Count the rows of `table` grouped by `field`
pub fn count(job: &JobArgs, table: &str, field: &str, args: &CountArgs, config: &EtlConfig) -> Result<Vec<GroupCount>> {
    let store = open_table(&job.db, table, config)?;
    let field = resolve_field(&store, field, config)?;
    let filter = match &args.filter_field {
        Some(name) => RecordFilter::FieldIn {
            field: resolve_field(&store, name, config)?,
            values: args.filter_values.iter().map(|v| filter_value(v)).collect(),
        },
        None => RecordFilter::All,
    };
    let options = CountOptions {
        filter,
        order: args.order,
        limit: args.limit,
        batch_len: job.batch_len(config),
    };

    tracing::info!("Counting '{}' of '{}'...", field, store.name());
    let groups = if args.by_date {
        aggregate::count_in_date(&store, &field, &options)
    } else {
        aggregate::count_in_category(&store, &field, &options)
    }
    .with_context(|| format!("Failed to count '{}' of '{}'", field, store.name()))?;

    let total: usize = groups.iter().map(|g| g.count).sum();
    tracing::info!("✓ {} row(s) in {} group(s)", total, groups.len());
    Ok(groups)
}
