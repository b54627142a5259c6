// ABOUTME: Numeric coercion of table cells with configurable null/NaN/blank handling
// ABOUTME: Classification order is null, then NaN, then blank, then float parse

use super::Cell;
use crate::utils::parse_float;
use serde::Deserialize;

/// How [`super::Columns::make_real`] maps each cell to a real number.
///
/// A cell is checked against the null markers first, then the NaN markers, then the
/// blank markers; only if none match is it parsed as a float (scientific-notation
/// spellings included). Unparseable cells become `default_value`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RealOptions {
    pub null_markers: Vec<String>,
    pub nan_markers: Vec<String>,
    pub blank_markers: Vec<String>,
    /// `None` keeps null cells null
    pub null_value: Option<f64>,
    pub nan_value: f64,
    pub blank_value: f64,
    pub default_value: f64,
}

impl Default for RealOptions {
    fn default() -> Self {
        Self {
            null_markers: ["None", "none", "NULL", "null", "Null", "N/A", "n/a", "NA"]
                .map(String::from)
                .to_vec(),
            nan_markers: ["NaN", "nan", "NAN", "-NaN", "-nan"].map(String::from).to_vec(),
            blank_markers: ["", "-", "--", "?"].map(String::from).to_vec(),
            null_value: None,
            nan_value: 0.0,
            blank_value: 0.0,
            default_value: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellClass {
    Null,
    NaN,
    Blank,
    Value,
}

impl RealOptions {
    pub(crate) fn classify(&self, cell: &Cell) -> CellClass {
        match cell {
            Cell::Null => CellClass::Null,
            Cell::Real(x) if x.is_nan() => CellClass::NaN,
            Cell::Text(s) => {
                let t = s.trim();
                if self.null_markers.iter().any(|m| m == t) {
                    CellClass::Null
                } else if self.nan_markers.iter().any(|m| m == t) {
                    CellClass::NaN
                } else if self.blank_markers.iter().any(|m| m == t) {
                    CellClass::Blank
                } else {
                    CellClass::Value
                }
            }
            _ => CellClass::Value,
        }
    }

    /// Coerced copy of `cell`: always `Cell::Real` or `Cell::Null`
    pub fn coerce(&self, cell: &Cell) -> Cell {
        match self.classify(cell) {
            CellClass::Null => self.null_value.map(Cell::Real).unwrap_or(Cell::Null),
            CellClass::NaN => Cell::Real(self.nan_value),
            CellClass::Blank => Cell::Real(self.blank_value),
            CellClass::Value => Cell::Real(self.parse(cell)),
        }
    }

    fn parse(&self, cell: &Cell) -> f64 {
        match cell {
            Cell::Real(x) => *x,
            Cell::Int(i) => *i as f64,
            Cell::Bool(b) => f64::from(u8::from(*b)),
            Cell::Text(s) => parse_float(s).unwrap_or(self.default_value),
            Cell::Null => self.default_value,
        }
    }
}
