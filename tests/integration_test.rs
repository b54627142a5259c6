// ABOUTME: Integration tests for the full load, copy, reconcile and stats workflow
// ABOUTME: Runs every command end-to-end against throwaway SQLite databases

use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use tabular_etl::commands::{self, copy::CopyArgs, diff::DiffArgs, load::LoadArgs, JobArgs};
use tabular_etl::config::{parse_config, EtlConfig};
use tabular_etl::diff::{diff, DiffOptions};
use tabular_etl::interactive::FixedAnswer;
use tabular_etl::record::{FieldInfo, FieldType, Key, Record};
use tabular_etl::store::{MemoryStore, RecordFilter, RecordStore, SqliteStore};
use tabular_etl::transfer::{replace_write, transfer, ClearOutcome, ClearPolicy, TransferOptions, WriteMode};
use tempfile::TempDir;

fn station_fields() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("station", FieldType::Text).with_max_length(12),
        FieldInfo::new("reading", FieldType::Real),
        FieldInfo::new("active", FieldType::Boolean),
    ]
}

fn create_db(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("stations.sqlite");
    for table in ["stations", "stations_archive"] {
        SqliteStore::create(Connection::open(&path).unwrap(), table, &station_fields()).unwrap();
    }
    path
}

fn job(db: &Path) -> JobArgs {
    JobArgs {
        db: db.to_path_buf(),
        assume_yes: true,
        verbosity: 0,
        batch_len: Some(4),
        ..JobArgs::default()
    }
}

fn write_csv(dir: &TempDir, name: &str, rows: usize) -> PathBuf {
    let mut text = String::from("Station,Reading,Active\n");
    for i in 0..rows {
        text.push_str(&format!("st-{:02},{}.5,{}\n", i, i, if i % 2 == 0 { "yes" } else { "no" }));
    }
    text.push('\n');
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_csv_load_copy_and_diff_workflow() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let csv = write_csv(&dir, "readings.csv", 10);
    let config = EtlConfig::default();

    println!("Loading CSV...");
    let loaded = commands::load_csv(&job(&db), "stations", &csv, &LoadArgs::default(), &config).unwrap();
    assert_eq!(loaded.read, 10);
    assert_eq!(loaded.transferred, 10);
    assert!(loaded.failed.is_empty());
    println!("✓ Loaded {} rows", loaded.transferred);

    println!("Copying into the archive...");
    let copied = commands::copy(&job(&db), "stations", "stations_archive", &CopyArgs::default(), &config).unwrap();
    assert_eq!(copied.transferred, 10);
    assert_eq!(copied.batches, 3);

    println!("Diffing...");
    let report = commands::diff(&job(&db), "stations", "stations_archive", &DiffArgs::default(), &config).unwrap();
    assert_eq!(report.checked, 10);
    assert_eq!(report.matched, 10);
    assert!(report.is_clean());
    println!("✓ Tables match");

    let archive = SqliteStore::open(&db, "stations_archive").unwrap();
    let first = &archive.iterate(&RecordFilter::All).unwrap()[0];
    assert_eq!(first.get("station"), &json!("st-00"));
    assert_eq!(first.get("reading"), &json!(0.5));
}

#[test]
fn test_copy_with_confirmed_clear_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let csv = write_csv(&dir, "readings.csv", 6);
    let config = EtlConfig::default();
    commands::load_csv(&job(&db), "stations", &csv, &LoadArgs::default(), &config).unwrap();

    let args = CopyArgs {
        clear: ClearPolicy::ClearConfirm,
        ..CopyArgs::default()
    };
    for run in 0..3 {
        let report = commands::copy(&job(&db), "stations", "stations_archive", &args, &config).unwrap();
        assert_eq!(report.transferred, 6, "run {}", run);
    }
    assert_eq!(SqliteStore::open(&db, "stations_archive").unwrap().count().unwrap(), 6);
}

#[test]
fn test_declined_clear_keeps_rows_and_appends() {
    let fields = vec![FieldInfo::new("v", FieldType::Integer)];
    let source = MemoryStore::with_records(
        "src",
        fields.clone(),
        (1..=5).map(|i| Record::new(Some(Key::Int(i))).with_field("v", i)).collect(),
    );
    let mut dest = MemoryStore::with_records(
        "dst",
        fields,
        vec![Record::new(Some(Key::Int(100))).with_field("v", 0)],
    );
    let options = TransferOptions {
        clear: ClearPolicy::ClearConfirm,
        verbosity: 0,
        ..TransferOptions::default()
    };
    let report = transfer(&source, &mut dest, &options, None, &FixedAnswer(false)).unwrap();
    assert_eq!(report.clear, ClearOutcome::Declined);
    assert_eq!(dest.count().unwrap(), 6);
}

#[test]
fn test_replace_mode_rewrites_matching_rows() {
    let fields = vec![FieldInfo::new("v", FieldType::Integer)];
    let updates = MemoryStore::with_records(
        "updates",
        fields.clone(),
        vec![
            Record::new(Some(Key::Int(2))).with_field("v", 20),
            Record::new(Some(Key::Int(3))).with_field("v", 30),
        ],
    );
    let mut dest = MemoryStore::with_records(
        "dst",
        fields,
        (1..=4).map(|i| Record::new(Some(Key::Int(i))).with_field("v", i)).collect(),
    );
    let options = TransferOptions {
        write_mode: WriteMode::Replace,
        verbosity: 0,
        ..TransferOptions::default()
    };
    let report = transfer(&updates, &mut dest, &options, None, &FixedAnswer(true)).unwrap();
    assert_eq!(report.transferred, 2);
    assert_eq!(report.drift, 0);
    assert_eq!(dest.count().unwrap(), 4);

    let mut values: Vec<i64> = dest
        .iterate(&RecordFilter::All)
        .unwrap()
        .iter()
        .filter_map(|r| r.get("v").as_i64())
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 4, 20, 30]);
}

#[test]
fn test_replace_write_on_sqlite_counts_rows() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let mut store = SqliteStore::open(&db, "stations").unwrap();
    store
        .bulk_insert(
            (1..=3)
                .map(|i| Record::new(Some(Key::Int(i))).with_field("station", format!("s{}", i)))
                .collect(),
        )
        .unwrap();

    let replacement = Record::new(Some(Key::Int(2))).with_field("station", "renamed");
    let drift = replace_write(&mut store, vec![replacement], false).unwrap();
    assert_eq!(drift, 0);
    assert_eq!(store.count().unwrap(), 3);
    let names: Vec<serde_json::Value> = store
        .iterate(&RecordFilter::All)
        .unwrap()
        .iter()
        .map(|r| r.get("station").clone())
        .collect();
    assert!(names.contains(&json!("renamed")));
    assert!(!names.contains(&json!("s2")));
}

#[test]
fn test_diff_sampling_is_reproducible_with_seed() {
    let fields = vec![FieldInfo::new("v", FieldType::Integer)];
    let records: Vec<Record> = (1..=200).map(|i| Record::new(Some(Key::Int(i))).with_field("v", i)).collect();
    let source = MemoryStore::with_records("s", fields.clone(), records.clone());
    let dest = MemoryStore::with_records("d", fields, records);
    let options = DiffOptions {
        limit: Some(25),
        seed: Some(7),
        verbosity: 0,
        ..DiffOptions::default()
    };
    let a = diff(&source, &dest, &options).unwrap();
    let b = diff(&source, &dest, &options).unwrap();
    assert!(a.sampled);
    assert_eq!(a.checked, 25);
    assert_eq!(a, b);
}

#[test]
fn test_config_file_drives_batching() {
    let config = parse_config("batch_len = 3\n[synonyms]\nstation = [\"site\"]\n").unwrap();
    assert_eq!(config.batch_len, 3);

    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let csv = dir.path().join("sites.csv");
    std::fs::write(&csv, "site,reading\nA,1\nB,2\nC,3\nD,4\n").unwrap();
    let job = JobArgs {
        batch_len: None,
        ..job(&db)
    };
    let report = commands::load_csv(&job, "stations", &csv, &LoadArgs::default(), &config).unwrap();
    assert_eq!(report.batches, 2);

    let stored = SqliteStore::open(&db, "stations").unwrap();
    let first = &stored.iterate(&RecordFilter::All).unwrap()[0];
    assert_eq!(first.get("station"), &json!("A"));
}
