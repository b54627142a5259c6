// ABOUTME: load-csv and load-json commands importing files into a SQLite table
// ABOUTME: CSV headers are matched to table fields fuzzily; directories load every CSV once-cleared

use super::{open_table, JobArgs};
use crate::config::EtlConfig;
use crate::ingest::{self, CsvDirOptions, CsvOptions};
use crate::record::{FieldInfo, FieldType};
use crate::resolver::FuzzyResolver;
use crate::store::{RecordStore, SqliteStore};
use crate::transfer::{import_row_stream, ClearPolicy, TransferOptions, TransferReport};
use crate::utils::column_name;
use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Options of the load commands beyond [`JobArgs`]
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub clear: ClearPolicy,
    /// Abort on the first bad row instead of skipping it
    pub strict: bool,
    /// Create the table from the CSV header when it does not exist
    pub create: bool,
    pub delimiter: Option<u8>,
    /// Descend into subdirectories when loading a directory
    pub recursive: bool,
    /// Filename suffix for directory loads
    pub extension: Option<String>,
}

fn transfer_options(job: &JobArgs, args: &LoadArgs, config: &EtlConfig) -> TransferOptions {
    TransferOptions {
        batch_len: job.batch_len(config),
        clear: args.clear,
        dry_run: job.dry_run,
        ignore_errors: !args.strict,
        verbosity: job.verbosity,
        ..TransferOptions::default()
    }
}

/// Map CSV header names onto the table's field names; unmatched headers are dropped
fn match_header(header: &[String], fields: &[FieldInfo], config: &EtlConfig) -> Vec<String> {
    let resolver = FuzzyResolver::from_config(fields.iter().map(|f| f.name.clone()), config);
    header
        .iter()
        .map(|name| match resolver.find_synonymous_field(name) {
            Some(field) => {
                if &field != name {
                    tracing::info!("Column '{}' -> field '{}'", name, field);
                }
                field
            }
            None => {
                tracing::warn!("⚠ Column '{}' matches no field, ignoring it", name);
                format!("__unmatched_{}", name)
            }
        })
        .collect()
}

/// Table named `table` in `db`, created from `header` as text columns if allowed
fn table_for_csv(db: &Path, table: &str, header: Option<&[String]>, create: bool, config: &EtlConfig) -> Result<SqliteStore> {
    if create {
        let conn = Connection::open(db).with_context(|| format!("Failed to open database {}", db.display()))?;
        if !SqliteStore::list_tables(&conn)?.iter().any(|t| t == table) {
            let Some(header) = header else {
                bail!("Cannot create '{}' from a CSV file without a header", table);
            };
            let fields: Vec<FieldInfo> = header
                .iter()
                .map(|h| FieldInfo::new(&column_name(h), FieldType::Text))
                .collect();
            tracing::info!("Creating table '{}' with {} column(s)", table, fields.len());
            let store = SqliteStore::create(conn, table, &fields)?;
            return Ok(store.with_fallback_encodings(config.fallbacks()));
        }
    }
    open_table(db, table, config)
}

/// Load a CSV file, or every CSV file in a directory, into `table`.
///
/// # Arguments
///
/// * `job` - Database, dry-run, confirmation and verbosity settings
/// * `table` - Destination table, resolved fuzzily
/// * `path` - CSV file or directory
/// * `args` - Clear policy, strictness and directory options
/// * `config` - Batch size, encodings and name-resolution settings
///
/// # Errors
///
/// This function will return an error if:
/// - The table cannot be resolved (or created with `--create`)
/// - The file cannot be read or, in strict mode, holds a bad row
/// - Writing to the database fails
pub fn load_csv(job: &JobArgs, table: &str, path: &Path, args: &LoadArgs, config: &EtlConfig) -> Result<TransferReport> {
    tracing::info!("Starting CSV load into '{}'...", table);
    let options = transfer_options(job, args, config);
    let prompt = job.prompt();
    let csv = CsvOptions {
        delimiter: args.delimiter,
        fallbacks: config.fallbacks(),
        strict: args.strict,
        ..CsvOptions::default()
    };

    if path.is_dir() {
        let filter = CsvDirOptions {
            recursive: args.recursive,
            extension: args.extension.clone().or_else(|| Some(".csv".to_string())),
        };
        let files = ingest::find_files(path, &filter)?;
        let Some(first) = files.first() else {
            bail!("No CSV files found under {}", path.display());
        };
        let header = ingest::open_csv(first, &csv)?.names().map(<[String]>::to_vec);
        let mut dest = table_for_csv(&job.db, table, header.as_deref(), args.create, config)?;
        let fields = dest.fields()?;
        let csv = CsvOptions {
            field_names: header.map(|h| match_header(&h, &fields, config)),
            ..csv
        };
        let report = ingest::load_all_csvs(path, &mut dest, &filter, &csv, &options, None, prompt.as_ref())
            .with_context(|| format!("Failed to load CSV files from {}", path.display()))?;
        tracing::info!("✓ Loaded {} record(s) into '{}'", report.transferred, dest.name());
        return Ok(report);
    }

    let mut rows = ingest::open_csv(path, &csv).with_context(|| format!("Failed to open {}", path.display()))?;
    let header = rows.names().map(<[String]>::to_vec);
    let mut dest = table_for_csv(&job.db, table, header.as_deref(), args.create, config)?;
    if let Some(header) = header {
        rows.rename(match_header(&header, &dest.fields()?, config));
    }

    let report = import_row_stream(rows, &mut dest, &options, None, prompt.as_ref())
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if report.all_failed() {
        bail!("Every row of {} failed to import", path.display());
    }
    tracing::info!("✓ Loaded {} record(s) into '{}'", report.transferred, dest.name());
    Ok(report)
}

/// Load a JSON array of objects into `table`
pub fn load_json(job: &JobArgs, table: &str, path: &Path, args: &LoadArgs, config: &EtlConfig) -> Result<TransferReport> {
    tracing::info!("Starting JSON load into '{}'...", table);
    let mut dest = open_table(&job.db, table, config)?;
    let options = transfer_options(job, args, config);
    let prompt = job.prompt();
    let report = ingest::load_json(path, &mut dest, &options, None, prompt.as_ref())
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if report.all_failed() {
        bail!("Every record of {} failed to import", path.display());
    }
    tracing::info!("✓ Loaded {} record(s) into '{}'", report.transferred, dest.name());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::people_db;
    use serde_json::json;
    use tempfile::TempDir;

    fn job(db: &Path) -> JobArgs {
        JobArgs {
            db: db.to_path_buf(),
            assume_yes: true,
            ..JobArgs::default()
        }
    }

    #[test]
    fn test_load_csv_matches_headers() {
        let dir = TempDir::new().unwrap();
        let db = people_db(&dir);
        let csv = dir.path().join("people.csv");
        std::fs::write(&csv, "Full Name;Birth Date;shoe size\nAda;1815-12-10;38\nAlan;1912-06-23;44\n").unwrap();

        let report = load_csv(&job(&db), "people", &csv, &LoadArgs::default(), &EtlConfig::default()).unwrap();
        assert_eq!(report.transferred, 2);

        let store = SqliteStore::open(&db, "people").unwrap();
        let records = store.iterate(&crate::store::RecordFilter::All).unwrap();
        assert_eq!(records[0].get("full_name"), &json!("Ada"));
        assert_eq!(records[1].get("birth_date"), &json!("1912-06-23"));
    }

    #[test]
    fn test_load_csv_creates_table() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("new.sqlite");
        let csv = dir.path().join("cities.csv");
        std::fs::write(&csv, "city,population\nOslo,700000\n").unwrap();
        let args = LoadArgs {
            create: true,
            ..LoadArgs::default()
        };
        let report = load_csv(&job(&db), "cities", &csv, &args, &EtlConfig::default()).unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(SqliteStore::open(&db, "cities").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn test_dry_run_load_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let db = people_db(&dir);
        let csv = dir.path().join("people.csv");
        std::fs::write(&csv, "full_name,birth_date\nAda,1815\n").unwrap();
        let job = JobArgs {
            dry_run: true,
            ..job(&db)
        };
        let report = load_csv(&job, "people", &csv, &LoadArgs::default(), &EtlConfig::default()).unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(SqliteStore::open(&db, "people").unwrap().count().unwrap(), 0);
    }
}
