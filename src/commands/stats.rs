// ABOUTME: stats command computing covariance and Pearson correlation matrices
// ABOUTME: Reads numeric columns from a table or a delimited text file

use super::{open_table, resolve_fields, JobArgs};
use crate::columns::{Cell, Columns, Matrix};
use crate::config::EtlConfig;
use crate::interactive::select_columns;
use crate::store::{RecordFilter, RecordStore};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where the stats command reads its columns from
#[derive(Debug, Clone)]
pub enum StatsInput {
    Table(String),
    /// Delimited text; the first line names the columns
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct StatsArgs {
    /// Columns to include; empty means all (or an interactive choice with `select`)
    pub columns: Vec<String>,
    /// Pick columns interactively
    pub select: bool,
    /// Delta degrees of freedom for the covariance divisor
    pub ddof: usize,
    pub delimiter: Option<char>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub names: Vec<String>,
    pub rows: usize,
    pub cov: Matrix,
    pub pierson: Matrix,
}

fn table_columns(job: &JobArgs, table: &str, args: &StatsArgs, config: &EtlConfig) -> Result<(Columns, Vec<String>)> {
    let store = open_table(&job.db, table, config)?;
    let wanted = resolve_fields(&store, &args.columns, config)?;
    let records = store.iterate(&RecordFilter::All)?;
    let mut columns = Columns::new();
    columns.from_records(&records, &["pk"]);
    Ok((columns, wanted))
}

fn file_columns(path: &Path, args: &StatsArgs) -> Result<(Columns, Vec<String>)> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        bail!("{} is empty", path.display());
    };
    let delimiter = args
        .delimiter
        .unwrap_or_else(|| crate::columns::sniff_delimiter(header));
    let names: Vec<String> = if delimiter == ' ' {
        header.split_whitespace().map(str::to_string).collect()
    } else {
        header.split(delimiter).map(|n| n.trim().to_string()).collect()
    };
    let body: Vec<&str> = lines.collect();
    let mut columns = Columns::new();
    columns.from_delimited_string(&body.join("\n"), Some(delimiter));
    let data = columns.as_column_wise_lists().to_vec();
    columns.from_column_wise_lists(data, Some(names));
    Ok((columns, args.columns.clone()))
}

/// Keep only `wanted` columns (all when empty), in the requested order
fn select(columns: &Columns, wanted: &[String]) -> Result<Columns> {
    if wanted.is_empty() {
        return Ok(columns.clone());
    }
    let mut data: Vec<Vec<Cell>> = Vec::with_capacity(wanted.len());
    for name in wanted {
        let Some(cells) = columns.column(name) else {
            bail!("No column named '{}'", name);
        };
        data.push(cells.to_vec());
    }
    let mut out = Columns::new();
    out.from_column_wise_lists(data, Some(wanted.to_vec()));
    Ok(out)
}

/// Covariance and Pearson correlation of the numeric columns of `input`.
///
/// Cells are coerced with the configured null/NaN/blank markers. Unparseable text
/// counts as zero; a null cell is an error naming its column and row.
///
/// # Errors
///
/// Fails when the input cannot be read, a column is unknown, the columns are ragged,
/// a cell is not numeric, or there are no more than `ddof` rows.
pub fn stats(job: &JobArgs, input: &StatsInput, args: &StatsArgs, config: &EtlConfig) -> Result<StatsReport> {
    let (all, mut wanted) = match input {
        StatsInput::Table(table) => table_columns(job, table, args, config)?,
        StatsInput::File(path) => file_columns(path, args)?,
    };
    if all.is_empty() {
        bail!("No columns to analyse");
    }
    if wanted.is_empty() && args.select {
        wanted = select_columns("Select columns to include:", all.names())?;
    }

    let mut columns = select(&all, &wanted)?;
    let options = config.real_options();
    let cov = columns.cov(args.ddof, &options).context("Failed to compute covariance")?;
    let pierson = columns.pierson(args.ddof, &options).context("Failed to compute correlation")?;
    let report = StatsReport {
        names: columns.names().to_vec(),
        rows: columns.len_column().unwrap_or(0),
        cov,
        pierson,
    };
    tracing::info!(
        "✓ Computed statistics over {} column(s) and {} row(s)",
        report.names.len(),
        report.rows
    );
    Ok(report)
}

/// Render a square matrix with its column names as row and column labels
pub fn format_matrix(names: &[String], matrix: &Matrix) -> String {
    let width = names.iter().map(String::len).max().unwrap_or(0).max(10);
    let mut out = format!("{:width$}", "", width = width);
    for name in names {
        out.push_str(&format!(" {:>width$}", name, width = width));
    }
    out.push('\n');
    for (name, row) in names.iter().zip(matrix) {
        out.push_str(&format!("{:width$}", name, width = width));
        for value in row {
            out.push_str(&format!(" {:>width$.4}", value, width = width));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stats_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "x,y,label\n1,2,a\n2,4,b\n3,6,c\n4,8,d\n").unwrap();

        let args = StatsArgs {
            columns: vec!["x".to_string(), "y".to_string()],
            ..StatsArgs::default()
        };
        let report = stats(&JobArgs::default(), &StatsInput::File(path), &args, &EtlConfig::default()).unwrap();
        assert_eq!(report.names, vec!["x", "y"]);
        assert_eq!(report.rows, 4);
        assert!((report.cov[0][0] - 1.25).abs() < 1e-12);
        assert!((report.cov[0][1] - 2.5).abs() < 1e-12);
        assert!((report.pierson[0][1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_null_cell_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "x y\n1 null\n2 3\n").unwrap();
        let result = stats(&JobArgs::default(), &StatsInput::File(path), &StatsArgs::default(), &EtlConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_from_table() {
        use crate::record::{FieldInfo, FieldType, Key, Record};
        use crate::store::SqliteStore;
        use rusqlite::Connection;

        let dir = TempDir::new().unwrap();
        let db = dir.path().join("stats.sqlite");
        let mut store = SqliteStore::create(
            Connection::open(&db).unwrap(),
            "readings",
            &[
                FieldInfo::new("temp", FieldType::Real),
                FieldInfo::new("load", FieldType::Real),
            ],
        )
        .unwrap();
        store
            .bulk_insert(
                (1..=3)
                    .map(|i| Record::new(Some(Key::Int(i))).with_field("temp", i as f64).with_field("load", 10.0 - i as f64))
                    .collect(),
            )
            .unwrap();

        let job = JobArgs {
            db,
            ..JobArgs::default()
        };
        let report = stats(&job, &StatsInput::Table("readings".to_string()), &StatsArgs::default(), &EtlConfig::default()).unwrap();
        assert_eq!(report.names.len(), 2);
        assert!((report.pierson[0][1] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_format_matrix() {
        let text = format_matrix(&["a".to_string()], &vec![vec![1.0]]);
        assert!(text.contains("1.0000"));
    }
}
