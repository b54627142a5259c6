// ABOUTME: clear command deleting every row of a table in batches
// ABOUTME: Asks for confirmation unless --yes is given; dry runs only count

use super::{open_table, JobArgs};
use crate::config::EtlConfig;
use crate::store::RecordStore;
use crate::transfer::{clear_store, ClearOutcome, ClearPolicy};
use anyhow::{Context, Result};

/// Delete all rows of `table` after confirmation.
///
/// # Errors
///
/// Fails if the table cannot be resolved or the delete fails. A declined
/// confirmation is not an error; it returns [`ClearOutcome::Declined`].
pub fn clear(job: &JobArgs, table: &str, config: &EtlConfig) -> Result<ClearOutcome> {
    let mut store = open_table(&job.db, table, config)?;
    let prompt = job.prompt();
    let outcome = clear_store(
        &mut store,
        ClearPolicy::ClearConfirm,
        job.dry_run,
        job.batch_len(config),
        prompt.as_ref(),
    )
    .with_context(|| format!("Failed to clear '{}'", store.name()))?;
    Ok(outcome)
}
