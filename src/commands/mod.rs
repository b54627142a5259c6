// ABOUTME: Command implementations behind each CLI subcommand
// ABOUTME: Shared helpers resolve fuzzy table and field names against a SQLite database

pub mod clear;
pub mod copy;
pub mod copy_field;
pub mod count;
pub mod dedupe;
pub mod diff;
pub mod export;
pub mod fingerprint;
pub mod load;
pub mod stats;

pub use clear::clear;
pub use copy::copy;
pub use copy_field::copy_field;
pub use count::count;
pub use dedupe::dedupe;
pub use diff::diff;
pub use export::export_json;
pub use fingerprint::fingerprint;
pub use load::{load_csv, load_json};
pub use stats::stats;

use crate::config::EtlConfig;
use crate::interactive::{prompt_for, Prompt};
use crate::record::find_field_info;
use crate::resolver::FuzzyResolver;
use crate::store::{RecordStore, SqliteStore};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Settings shared by every command that touches a database
#[derive(Debug, Clone, Default)]
pub struct JobArgs {
    /// SQLite database file
    pub db: PathBuf,
    pub dry_run: bool,
    /// Answer yes to every confirmation
    pub assume_yes: bool,
    pub verbosity: u8,
    /// Overrides the configured batch size
    pub batch_len: Option<usize>,
}

impl JobArgs {
    pub fn batch_len(&self, config: &EtlConfig) -> usize {
        self.batch_len.unwrap_or(config.batch_len)
    }

    pub fn prompt(&self) -> Box<dyn Prompt> {
        prompt_for(self.assume_yes)
    }
}

/// Resolve a possibly misspelled table name against the tables in `db`
pub fn resolve_table(db: &Path, name: &str, config: &EtlConfig) -> Result<String> {
    let conn = Connection::open(db).with_context(|| format!("Failed to open database {}", db.display()))?;
    let tables = SqliteStore::list_tables(&conn)
        .with_context(|| format!("Failed to list tables in {}", db.display()))?;
    if tables.iter().any(|t| t == name) {
        return Ok(name.to_string());
    }

    let resolver = FuzzyResolver::from_config(tables, config);
    let table = resolver
        .resolve_strict(name)
        .with_context(|| format!("No table in {} matches '{}'", db.display(), name))?;
    tracing::info!("Resolved table '{}' to '{}'", name, table);
    Ok(table)
}

/// Open a table of `db`, resolving its name fuzzily
pub fn open_table(db: &Path, name: &str, config: &EtlConfig) -> Result<SqliteStore> {
    let table = resolve_table(db, name, config)?;
    let store = SqliteStore::open(db, &table)
        .with_context(|| format!("Failed to open table '{}'", table))?
        .with_fallback_encodings(config.fallbacks());
    Ok(store)
}

/// Resolve a field name of `store`, trying configured synonyms as well
pub fn resolve_field<S: RecordStore + ?Sized>(store: &S, name: &str, config: &EtlConfig) -> Result<String> {
    let fields = store.fields()?;
    if let Some(field) = find_field_info(&fields, name) {
        return Ok(field.name.clone());
    }
    let resolver = FuzzyResolver::from_config(fields.iter().map(|f| f.name.clone()), config);
    match resolver.find_synonymous_field(name) {
        Some(field) => {
            tracing::info!("Resolved field '{}' of '{}' to '{}'", name, store.name(), field);
            Ok(field)
        }
        None => resolver
            .resolve_strict(name)
            .with_context(|| format!("No field of '{}' matches '{}'", store.name(), name)),
    }
}

/// Resolve several field names, see [`resolve_field`]
pub fn resolve_fields<S: RecordStore + ?Sized>(
    store: &S,
    names: &[String],
    config: &EtlConfig,
) -> Result<Vec<String>> {
    names.iter().map(|n| resolve_field(store, n, config)).collect()
}
