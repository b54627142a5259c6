// ABOUTME: export-json command dumping a table to batch-sized JSON fixture files
// ABOUTME: The files can be loaded back with load-json

use super::{open_table, JobArgs};
use crate::config::EtlConfig;
use crate::ingest;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Export `table` to `<dir>/<table>--NNNN.json`, one file per batch
pub fn export_json(job: &JobArgs, table: &str, dir: &Path, config: &EtlConfig) -> Result<Vec<PathBuf>> {
    let store = open_table(&job.db, table, config)?;
    let files = ingest::export_json(&store, dir, job.batch_len(config))
        .with_context(|| format!("Failed to export '{}' to {}", table, dir.display()))?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::load::{load_json, LoadArgs};
    use crate::record::{FieldInfo, FieldType, Record};
    use crate::store::{RecordStore, SqliteStore};
    use crate::transfer::ClearPolicy;
    use rusqlite::Connection;
    use tempfile::TempDir;

    #[test]
    fn test_export_then_reload() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("export.sqlite");
        let mut store = SqliteStore::create(
            Connection::open(&db).unwrap(),
            "notes",
            &[FieldInfo::new("body", FieldType::Text)],
        )
        .unwrap();
        store
            .bulk_insert((0..5).map(|i| Record::new(None).with_field("body", format!("note {}", i))).collect())
            .unwrap();

        let job = JobArgs {
            db: db.clone(),
            assume_yes: true,
            verbosity: 0,
            batch_len: Some(2),
            ..JobArgs::default()
        };
        let out = dir.path().join("out");
        let files = export_json(&job, "notes", &out, &EtlConfig::default()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("notes--0000.json"));

        let args = LoadArgs {
            clear: ClearPolicy::Clear,
            ..LoadArgs::default()
        };
        let report = load_json(&job, "notes", &files[2], &args, &EtlConfig::default()).unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(SqliteStore::open(&db, "notes").unwrap().count().unwrap(), 1);
    }
}
