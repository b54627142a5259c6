// ABOUTME: Ordered named-column container with loaders for every common input shape
// ABOUTME: Tracks column length and orientation; statistics live in the stats submodule

pub mod real;
pub mod stats;

pub use real::RealOptions;
pub use stats::{best_scale_factor, cov, pierson, Matrix, RealMatrix};

use crate::record::Record;
use serde_json::{Map, Value};
use std::fmt;

/// A single value held by [`Columns`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Cell::Real(x) => Some(*x),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "None"),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Real(x) => write!(f, "{}", x),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&Value> for Cell {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => Cell::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Real(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// At least as many rows as columns
    Tall,
    Wide,
}

/// Input shapes [`Columns::load`] understands
#[derive(Debug, Clone)]
pub enum TableSource<'a> {
    /// Lines of delimited values; `None` sniffs the delimiter
    Delimited {
        text: &'a str,
        delimiter: Option<char>,
    },
    RowWise(Vec<Vec<Cell>>),
    ColumnWise {
        columns: Vec<Vec<Cell>>,
        names: Option<Vec<String>>,
    },
    Mappings(&'a [Map<String, Value>]),
    Records {
        records: &'a [Record],
        ignore_fields: &'a [&'a str],
    },
}

/// An ordered mapping from column name to column values.
///
/// Unnamed inputs get positional names `"0"`, `"1"`, ... Every loader clears prior
/// state and recomputes `len_column` as the shortest column seen, so ragged input is
/// tolerated until something needs a rectangular table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    names: Vec<String>,
    data: Vec<Vec<Cell>>,
    len_column: Option<usize>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, source: TableSource<'_>) -> &mut Self {
        match source {
            TableSource::Delimited { text, delimiter } => self.from_delimited_string(text, delimiter),
            TableSource::RowWise(rows) => self.from_row_wise_lists(rows),
            TableSource::ColumnWise { columns, names } => self.from_column_wise_lists(columns, names),
            TableSource::Mappings(maps) => self.from_dict_list(maps),
            TableSource::Records {
                records,
                ignore_fields,
            } => self.from_records(records, ignore_fields),
        }
    }

    /// Load rows of values; row `i` value `j` lands in column `j`
    pub fn from_row_wise_lists(&mut self, rows: Vec<Vec<Cell>>) -> &mut Self {
        self.reset();
        for row in rows {
            for (j, value) in row.into_iter().enumerate() {
                if j == self.data.len() {
                    self.names.push(j.to_string());
                    self.data.push(Vec::new());
                }
                self.data[j].push(value);
            }
        }
        self.recompute_len();
        self
    }

    pub fn from_column_wise_lists(
        &mut self,
        columns: Vec<Vec<Cell>>,
        names: Option<Vec<String>>,
    ) -> &mut Self {
        self.reset();
        let names = names.unwrap_or_default();
        for (j, column) in columns.into_iter().enumerate() {
            let name = names.get(j).cloned().unwrap_or_else(|| j.to_string());
            self.push_column(name, column);
        }
        self.recompute_len();
        self
    }

    /// Load mappings; column order follows the first mapping, later keys are appended
    pub fn from_dict_list(&mut self, maps: &[Map<String, Value>]) -> &mut Self {
        self.reset();
        for map in maps {
            for (name, value) in map {
                let idx = self.index_or_insert(name);
                self.data[idx].push(Cell::from(value));
            }
        }
        self.recompute_len();
        self
    }

    /// Load store records, the key first under `pk`
    pub fn from_records(&mut self, records: &[Record], ignore_fields: &[&str]) -> &mut Self {
        self.reset();
        for record in records {
            if !ignore_fields.contains(&"pk") {
                let idx = self.index_or_insert("pk");
                let cell = match &record.pk {
                    Some(k) => Cell::from(&k.to_value()),
                    None => Cell::Null,
                };
                self.data[idx].push(cell);
            }
            for (name, value) in &record.fields {
                if ignore_fields.contains(&name.as_str()) {
                    continue;
                }
                let idx = self.index_or_insert(name);
                self.data[idx].push(Cell::from(value));
            }
        }
        self.recompute_len();
        self
    }

    /// Load lines of delimited text as rows; blank lines are skipped
    pub fn from_delimited_string(&mut self, text: &str, delimiter: Option<char>) -> &mut Self {
        let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
        let rows: Vec<Vec<Cell>> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                if delimiter == ' ' {
                    line.split_whitespace().map(Cell::from).collect()
                } else {
                    line.split(delimiter).map(|v| Cell::from(v.trim())).collect()
                }
            })
            .collect();
        self.from_row_wise_lists(rows)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.data[idx].as_slice())
    }

    /// Column by position; negative indices count from the end
    pub fn column_at(&self, index: isize) -> Option<&[Cell]> {
        let n = self.data.len() as isize;
        if n == 0 || index >= n || index < -n {
            return None;
        }
        Some(&self.data[index.rem_euclid(n) as usize])
    }

    pub fn num_columns(&self) -> usize {
        self.data.len()
    }

    /// Shortest column length, `None` when there are no columns
    pub fn len_column(&self) -> Option<usize> {
        self.len_column
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Longest minus shortest column length is nonzero
    pub fn is_ragged(&self) -> bool {
        self.length_bounds().is_some_and(|(min, max)| min != max)
    }

    pub(crate) fn length_bounds(&self) -> Option<(usize, usize)> {
        let min = self.data.iter().map(Vec::len).min()?;
        let max = self.data.iter().map(Vec::len).max()?;
        Some((min, max))
    }

    pub fn orientation(&self) -> Orientation {
        match self.len_column {
            Some(len) if self.data.len() > len => Orientation::Wide,
            _ => Orientation::Tall,
        }
    }

    pub fn as_column_wise_lists(&self) -> &[Vec<Cell>] {
        &self.data
    }

    /// Rows truncated to `len_column`
    pub fn as_row_wise_lists(&self) -> Vec<Vec<Cell>> {
        let len = self.len_column.unwrap_or(0);
        (0..len)
            .map(|i| self.data.iter().map(|col| col[i].clone()).collect())
            .collect()
    }

    /// Swap rows and columns; names become positional
    pub fn transposed(&self) -> Columns {
        let mut out = Columns::new();
        out.from_row_wise_lists(self.data.clone());
        out
    }

    /// Transpose in place if there are more columns than rows
    pub fn make_tall(&mut self) -> &mut Self {
        if self.orientation() == Orientation::Wide {
            *self = self.transposed();
        }
        self
    }

    /// Coerce every cell to a real number (or null), see [`RealOptions`]
    pub fn make_real(&mut self, options: &RealOptions) -> &mut Self {
        for column in &mut self.data {
            for cell in column.iter_mut() {
                *cell = options.coerce(cell);
            }
        }
        self
    }

    fn reset(&mut self) {
        self.names.clear();
        self.data.clear();
        self.len_column = None;
    }

    fn push_column(&mut self, name: String, values: Vec<Cell>) {
        self.names.push(name);
        self.data.push(values);
    }

    fn index_or_insert(&mut self, name: &str) -> usize {
        match self.names.iter().position(|n| n == name) {
            Some(idx) => idx,
            None => {
                self.push_column(name.to_string(), Vec::new());
                self.data.len() - 1
            }
        }
    }

    fn recompute_len(&mut self) {
        self.len_column = self.data.iter().map(Vec::len).min();
        if self.is_ragged() {
            tracing::debug!(
                "Ragged columns, truncating logical length to {:?}",
                self.len_column
            );
        }
    }
}

/// Pick the delimiter that splits the first line into the most fields
pub fn sniff_delimiter(text: &str) -> char {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [',', '|', '\t', ';']
        .into_iter()
        .max_by_key(|d| first.matches(*d).count())
        .filter(|d| first.contains(*d))
        .unwrap_or(' ')
}
