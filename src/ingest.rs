// ABOUTME: File adapters feeding the transfer engine: CSV and JSON import, JSON export
// ABOUTME: Decodes bytes best-effort, sniffs delimiters and skips banner and empty rows

use crate::columns::sniff_delimiter;
use crate::encoding::{decode_best_effort, default_fallbacks};
use crate::error::{EtlError, Result};
use crate::interactive::Prompt;
use crate::partition::partition;
use crate::record::{Key, Row};
use crate::store::RecordStore;
use crate::transfer::{
    clear_store, import_row_stream, import_rows, ClearPolicy, ImportHook, TransferOptions,
    TransferReport,
};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Header lines scanned before giving up on finding `num_header_rows` headers
const MAX_HEADER_SCAN: usize = 100;

#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field delimiter; sniffed from the first line when unset
    pub delimiter: Option<u8>,
    /// Header rows to consume; the last one names the columns
    pub num_header_rows: usize,
    /// Names for the columns by position, overriding the header
    pub field_names: Option<Vec<String>>,
    /// Encodings tried after UTF-8 for each cell
    pub fallbacks: Vec<&'static Encoding>,
    /// Fail on a row whose width differs from the first row's
    pub strict: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            num_header_rows: 1,
            field_names: None,
            fallbacks: default_fallbacks(),
            strict: false,
        }
    }
}

/// Banner lines some exporters put above the real header
fn is_banner(first_cell: &str) -> bool {
    let cell = first_cell.trim();
    let lower = cell.to_lowercase();
    lower.starts_with("directory:")
        || lower.starts_with("name:")
        || (!cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | '=' | '_')))
}

/// Lazily parsed data rows of a CSV stream
pub struct CsvRows<R: Read> {
    records: csv::ByteRecordsIntoIter<BufReader<R>>,
    names: Option<Vec<String>>,
    delimiter: u8,
    fallbacks: Vec<&'static Encoding>,
    width: Option<usize>,
    strict: bool,
    line: usize,
}

impl<R: Read> CsvRows<R> {
    /// Column names the rows are keyed by, if any
    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Replace the column names, e.g. with resolved destination field names
    pub fn rename(&mut self, names: Vec<String>) {
        self.width = Some(names.len());
        self.names = Some(names);
    }

    fn decode(&self, record: &csv::ByteRecord) -> Vec<String> {
        record
            .iter()
            .map(|cell| decode_best_effort(cell, &self.fallbacks))
            .collect()
    }

    fn to_row(&self, cells: Vec<String>) -> Row {
        match &self.names {
            Some(names) => {
                let mut map = Map::new();
                for (name, cell) in names.iter().zip(cells) {
                    map.insert(name.clone(), Value::String(cell));
                }
                Row::Mapping(map)
            }
            None => Row::Sequence(cells.into_iter().map(Value::String).collect()),
        }
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            let cells = self.decode(&record);
            if cells.iter().all(|c| c.trim().is_empty()) {
                tracing::debug!("Ignoring empty line {}", self.line);
                continue;
            }

            let width = *self.width.get_or_insert(cells.len());
            if cells.len() != width {
                if self.strict {
                    return Some(Err(EtlError::RaggedInput {
                        min: width.min(cells.len()),
                        max: width.max(cells.len()),
                    }));
                }
                tracing::warn!(
                    "⚠ Line {} has {} column(s), previous rows had {}",
                    self.line,
                    cells.len(),
                    width
                );
            }
            return Some(Ok(self.to_row(cells)));
        }
    }
}

/// Open a CSV stream, sniffing the delimiter and consuming the header rows.
///
/// # Errors
///
/// Fails if the stream can't be read or a header row is malformed.
pub fn csv_rows<R: Read>(reader: R, options: &CsvOptions) -> Result<CsvRows<R>> {
    let mut buffered = BufReader::with_capacity(64 * 1024, reader);
    let delimiter = match options.delimiter {
        Some(d) => d,
        None => {
            let head = decode_best_effort(buffered.fill_buf()?, &options.fallbacks);
            let first = head
                .lines()
                .find(|l| !l.trim().is_empty() && !is_banner(l))
                .unwrap_or("");
            match sniff_delimiter(first) {
                ' ' => b',',
                d => d as u8,
            }
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(buffered);

    let mut headers: Vec<Vec<String>> = Vec::new();
    let mut line = 0;
    let mut record = csv::ByteRecord::new();
    while headers.len() < options.num_header_rows && line < MAX_HEADER_SCAN {
        if !reader.read_byte_record(&mut record)? {
            break;
        }
        line += 1;
        let cells: Vec<String> = record
            .iter()
            .map(|c| decode_best_effort(c, &options.fallbacks).trim().to_string())
            .collect();
        let first = cells.first().map(String::as_str).unwrap_or("");
        if cells.iter().all(|c| c.is_empty()) || is_banner(first) {
            tracing::debug!("Ignoring header line {}: {:?}", line, cells);
            continue;
        }
        headers.push(cells);
    }

    let names = options.field_names.clone().or_else(|| headers.pop());
    tracing::debug!("CSV delimiter {:?}, columns {:?}", delimiter as char, names);
    Ok(CsvRows {
        records: reader.into_byte_records(),
        width: names.as_ref().map(Vec::len),
        names,
        delimiter,
        fallbacks: options.fallbacks.clone(),
        strict: options.strict,
        line,
    })
}

/// Open the CSV file at `path`, see [`csv_rows`]
pub fn open_csv(path: &Path, options: &CsvOptions) -> Result<CsvRows<File>> {
    let file = File::open(path)?;
    csv_rows(file, options)
}

/// Load one CSV file into `dest` through [`import_row_stream`].
///
/// # Arguments
///
/// * `path` - CSV file
/// * `dest` - Destination store
/// * `csv` - Parsing options
/// * `options` - Transfer options; a ragged row aborts the load unless `ignore_errors`
/// * `hook` - Optional custom per-row import
/// * `prompt` - Confirms clearing the destination
///
/// # Errors
///
/// Fails on unreadable files, on ragged rows in strict mode and on any error
/// [`import_row_stream`] reports.
pub fn load_csv<D: RecordStore + ?Sized>(
    path: &Path,
    dest: &mut D,
    csv: &CsvOptions,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport> {
    tracing::info!("Loading '{}' into '{}'", path.display(), dest.name());
    let csv = CsvOptions {
        strict: csv.strict || !options.ignore_errors,
        ..csv.clone()
    };
    let rows = open_csv(path, &csv)?;
    import_row_stream(rows, dest, options, hook, prompt)
}

/// Which files [`load_all_csvs`] picks up
#[derive(Debug, Clone, Default)]
pub struct CsvDirOptions {
    pub recursive: bool,
    /// Case-insensitive filename suffix, e.g. `.csv`
    pub extension: Option<String>,
}

/// Files under `dir` matching `filter`, sorted by path.
///
/// Symbolic links are not followed, so a link back into the tree is never walked twice.
pub fn find_files(dir: &Path, filter: &CsvDirOptions) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(dir).follow_links(false).sort_by_file_name();
    if !filter.recursive {
        walker = walker.max_depth(1);
    }
    let suffix = filter.extension.as_ref().map(|ext| ext.to_lowercase());

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if suffix.as_ref().map_or(true, |ext| name.ends_with(ext.as_str())) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Load every matching CSV file under `dir` into `dest`.
///
/// The clear policy is applied once, before the first file. Reports are summed.
pub fn load_all_csvs<D: RecordStore + ?Sized>(
    dir: &Path,
    dest: &mut D,
    filter: &CsvDirOptions,
    csv: &CsvOptions,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport> {
    if options.dry_run {
        tracing::info!("DRY RUN: no changes will be written to '{}'", dest.name());
    } else {
        tracing::warn!("⚠ This is not a dry run: '{}' will be modified", dest.name());
    }
    let files = find_files(dir, filter)?;
    tracing::info!("Found {} file(s) under '{}'", files.len(), dir.display());

    let clear = clear_store(dest, options.clear, options.dry_run, options.batch_len, prompt)?;
    let per_file = TransferOptions {
        clear: ClearPolicy::Keep,
        ..options.clone()
    };

    let mut total = TransferReport::new(clear, options.dry_run);
    for (i, file) in files.iter().enumerate() {
        tracing::info!("[{}/{}] {}", i + 1, files.len(), file.display());
        let report = load_csv(file, dest, csv, &per_file, hook, prompt)?;
        total.merge(report);
    }
    total.log_summary(dest.name());
    Ok(total)
}

/// A record in the exported fixture layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub model: String,
    pub pk: Option<Key>,
    pub fields: Map<String, Value>,
}

/// Flatten a JSON object into a row; fixture objects contribute their `pk` and `fields`
fn json_row(value: Value) -> Result<Row> {
    let Value::Object(mut map) = value else {
        return Err(EtlError::InvalidArgument(format!(
            "expected a JSON object per record, found {}",
            value
        )));
    };
    if let Some(Value::Object(fields)) = map.remove("fields") {
        let mut flat = fields;
        if let Some(pk) = map.remove("pk") {
            flat.insert("pk".to_string(), pk);
        }
        return Ok(Row::Mapping(flat));
    }
    Ok(Row::Mapping(map))
}

/// Import a JSON file holding an array of objects (plain or fixture layout).
///
/// # Errors
///
/// Fails if the file is not a JSON array of objects, or on any transfer error.
pub fn load_json<D: RecordStore + ?Sized>(
    path: &Path,
    dest: &mut D,
    options: &TransferOptions,
    hook: Option<&dyn ImportHook>,
    prompt: &dyn Prompt,
) -> Result<TransferReport> {
    tracing::info!("Reading JSON records from '{}'", path.display());
    let reader = BufReader::new(File::open(path)?);
    let items: Vec<Value> = serde_json::from_reader(reader)?;
    tracing::info!("Read {} item(s) from '{}'", items.len(), path.display());
    let rows = items.into_iter().map(json_row).collect::<Result<Vec<_>>>()?;
    import_rows(rows, dest, options, hook, prompt)
}

/// Write `store` to `dir` as one JSON file per partition batch.
///
/// Files are named `<store>--NNNN.json` and hold an array of [`FixtureRecord`]s, which
/// [`load_json`] reads back.
pub fn export_json<S: RecordStore + ?Sized>(
    store: &S,
    dir: &Path,
    batch_len: usize,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    let mut previous_high: Option<Key> = None;
    for batch in partition(store, batch_len)? {
        let batch = batch?;
        let fixtures: Vec<FixtureRecord> = batch
            .new_records(previous_high.as_ref())
            .map(|r| FixtureRecord {
                model: store.name().to_string(),
                pk: r.pk.clone(),
                fields: r.fields.clone(),
            })
            .collect();
        previous_high = Some(batch.range.high.clone());

        let path = dir.join(format!("{}--{:04}.json", store.name(), batch.index));
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, &fixtures)?;
        out.flush()?;
        tracing::debug!("Wrote {} record(s) to {}", fixtures.len(), path.display());
        written.push(path);
    }
    tracing::info!("✓ Exported '{}' to {} file(s)", store.name(), written.len());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::FixedAnswer;
    use crate::record::{FieldInfo, FieldType, Record};
    use crate::store::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn rows(text: &[u8], options: &CsvOptions) -> Vec<Row> {
        csv_rows(text, options)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_banner_lines() {
        assert!(is_banner("Directory: C:\\data"));
        assert!(is_banner("  name: export"));
        assert!(is_banner("=========="));
        assert!(!is_banner("name"));
        assert!(!is_banner(""));
    }

    #[test]
    fn test_sniffed_delimiter_and_header() {
        let text = b"Directory: /tmp\n-----\nid|label\n\n1|one\n2|two\n";
        let parsed = csv_rows(&text[..], &CsvOptions::default()).unwrap();
        assert_eq!(parsed.delimiter(), b'|');
        assert_eq!(parsed.names(), Some(&["id".to_string(), "label".to_string()][..]));
        let all: Vec<Row> = parsed.collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 2);
        let Row::Mapping(first) = &all[0] else {
            panic!("expected mapping rows");
        };
        assert_eq!(first["label"], json!("one"));
    }

    #[test]
    fn test_headerless_rows_are_sequences() {
        let options = CsvOptions {
            num_header_rows: 0,
            ..CsvOptions::default()
        };
        let all = rows(b"a,b\nc,d\n", &options);
        assert_eq!(all[1], Row::Sequence(vec![json!("c"), json!("d")]));
    }

    #[test]
    fn test_latin1_cells_decoded() {
        let options = CsvOptions {
            num_header_rows: 0,
            ..CsvOptions::default()
        };
        let all = rows(b"caf\xe9,x\n", &options);
        assert_eq!(all[0], Row::Sequence(vec![json!("café"), json!("x")]));
    }

    #[test]
    fn test_ragged_rows() {
        let text = b"a,b\n1,2\n3\n";
        assert_eq!(rows(text, &CsvOptions::default()).len(), 2);

        let strict = CsvOptions {
            strict: true,
            ..CsvOptions::default()
        };
        let result: Result<Vec<Row>> = csv_rows(&text[..], &strict).unwrap().collect();
        assert!(matches!(result, Err(EtlError::RaggedInput { min: 1, max: 2 })));
    }

    fn dest() -> MemoryStore {
        MemoryStore::new(
            "people",
            vec![
                FieldInfo::new("name", FieldType::Text),
                FieldInfo::new("age", FieldType::Integer),
            ],
        )
    }

    fn quiet() -> TransferOptions {
        TransferOptions {
            batch_len: 2,
            verbosity: 0,
            ..TransferOptions::default()
        }
    }

    #[test]
    fn test_load_all_csvs_clears_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.csv"), "name,age\ncy,3\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "name,age\nal,1\nbo,2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.csv"), "name,age\ndi,4\n").unwrap();

        let filter = CsvDirOptions {
            recursive: false,
            extension: Some(".CSV".into()),
        };
        let files = find_files(dir.path(), &filter).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.csv"));

        let mut store = dest();
        store.bulk_insert(vec![Record::new(None).with_field("name", "old")]).unwrap();
        let options = TransferOptions {
            clear: ClearPolicy::Clear,
            ..quiet()
        };
        let report = load_all_csvs(
            dir.path(),
            &mut store,
            &filter,
            &CsvOptions::default(),
            &options,
            None,
            &FixedAnswer(true),
        )
        .unwrap();
        assert_eq!(report.transferred, 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.records()[0].get("name"), &json!("al"));

        let recursive = CsvDirOptions {
            recursive: true,
            ..filter
        };
        assert_eq!(find_files(dir.path(), &recursive).unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_files_skips_symlinked_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.csv"), "name,age
al,1
").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let filter = CsvDirOptions {
            recursive: true,
            extension: Some(".csv".into()),
        };
        let files = find_files(dir.path(), &filter).unwrap();
        assert_eq!(files, vec![dir.path().join("a.csv")]);
    }

    #[test]
    fn test_export_then_load_json() {
        let dir = TempDir::new().unwrap();
        let records = (1..=5)
            .map(|i| {
                Record::new(Some(Key::Int(i)))
                    .with_field("name", format!("p{}", i))
                    .with_field("age", i * 10)
            })
            .collect();
        let source = MemoryStore::with_records("people", dest().fields().unwrap(), records);
        let files = export_json(&source, dir.path(), 2).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("people--0000.json"));

        let mut target = dest();
        for file in &files {
            load_json(file, &mut target, &quiet(), None, &FixedAnswer(false)).unwrap();
        }
        assert_eq!(target.count().unwrap(), 5);
        assert_eq!(target.records()[4].get("age"), &json!(50));
    }

    #[test]
    fn test_load_json_rejects_non_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let mut target = dest();
        assert!(matches!(
            load_json(&path, &mut target, &quiet(), None, &FixedAnswer(false)),
            Err(EtlError::InvalidArgument(_))
        ));
    }
}
