// ABOUTME: Builds destination records from parsed rows, coercing each value to its field type
// ABOUTME: Handles stripping, blank-to-null, mojibake repair and max_length truncation

use crate::encoding::clean_text;
use crate::error::Result;
use crate::record::{find_field_info, FieldInfo, FieldType, Key, Record, Row};
use crate::utils::parse_float;
use serde_json::Value;
use thiserror::Error;

/// Why a single value or row could not be converted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("value {value} in field '{field}' is not a valid {expected:?}")]
    Uncoercible {
        field: String,
        value: String,
        expected: FieldType,
    },

    #[error("value in field '{field}' has {len} characters, limit is {max}")]
    TooLong { field: String, len: usize, max: usize },

    #[error("no destination field named '{0}'")]
    UnknownField(String),
}

/// How [`record_from_row`] interprets a row
#[derive(Debug, Clone, PartialEq)]
pub struct RowOptions {
    /// Destination fields in row order; defaults to every destination field
    pub field_names: Option<Vec<String>>,
    /// Take the key from the row (`pk`/`id` entry, or the first value of a sequence)
    pub include_pk: bool,
    pub strip: bool,
    /// Blank strings become `""` in text fields instead of null
    pub blank_none: bool,
    /// Leave null values out of the record so the store applies its defaults
    pub ignore_field_nones: bool,
    /// Repair latin-1 mojibake in text values
    pub clean_unicode: bool,
    /// Uncoercible values and over-long strings are errors instead of null/truncated
    pub strict: bool,
}

impl Default for RowOptions {
    fn default() -> Self {
        Self {
            field_names: None,
            include_pk: false,
            strip: true,
            blank_none: true,
            ignore_field_nones: true,
            clean_unicode: true,
            strict: false,
        }
    }
}

/// Convert an already-parsed row into a record for a store with `fields`.
///
/// Mapping rows are matched by field name (or column name), sequence rows by
/// position. Each value is coerced to its field's type; in lenient mode a value that
/// cannot be coerced becomes null and an over-long string is truncated.
///
/// # Errors
///
/// In strict mode returns [`ConvertError`] for the first bad value. Unknown names in
/// `field_names` are always an error.
pub fn record_from_row(
    row: &Row,
    fields: &[FieldInfo],
    options: &RowOptions,
) -> std::result::Result<Record, ConvertError> {
    let targets: Vec<&FieldInfo> = match &options.field_names {
        Some(names) => names
            .iter()
            .map(|n| find_field_info(fields, n).ok_or_else(|| ConvertError::UnknownField(n.clone())))
            .collect::<std::result::Result<_, _>>()?,
        None => fields.iter().collect(),
    };

    let (pk, values): (Option<Key>, Vec<Value>) = match row {
        Row::Mapping(map) => {
            let pk = if options.include_pk {
                map.get("pk").or_else(|| map.get("id")).and_then(Key::from_value)
            } else {
                None
            };
            let values = targets
                .iter()
                .map(|f| {
                    map.get(&f.name)
                        .or_else(|| map.get(&f.column))
                        .cloned()
                        .unwrap_or(Value::Null)
                })
                .collect();
            (pk, values)
        }
        Row::Sequence(seq) => {
            let mut iter = seq.iter();
            let pk = if options.include_pk {
                iter.next().and_then(Key::from_value)
            } else {
                None
            };
            let values = targets
                .iter()
                .map(|_| iter.next().cloned().unwrap_or(Value::Null))
                .collect();
            (pk, values)
        }
    };

    let mut record = Record::new(pk);
    for (field, value) in targets.into_iter().zip(values) {
        let clean = coerce_value(value, field, options)?;
        if options.ignore_field_nones && clean.is_null() {
            continue;
        }
        record.fields.insert(field.column.clone(), clean);
    }
    Ok(record)
}

/// Coerce one raw value to the storage type of `field`
pub fn coerce_value(
    value: Value,
    field: &FieldInfo,
    options: &RowOptions,
) -> std::result::Result<Value, ConvertError> {
    let value = match value {
        Value::String(s) => {
            let s = if options.strip { s.trim().to_string() } else { s };
            if s.is_empty() {
                let keep_blank = options.blank_none && field.field_type == FieldType::Text;
                return Ok(if keep_blank { Value::from("") } else { Value::Null });
            }
            Value::String(s)
        }
        other => other,
    };
    if value.is_null() {
        return Ok(Value::Null);
    }

    let coerced = if field.is_related() {
        related_key(&value)
    } else {
        match field.field_type {
            FieldType::Text => Some(text_value(&value)),
            FieldType::Integer => integer_value(&value),
            FieldType::Real => real_value(&value),
            FieldType::Boolean => boolean_value(&value),
            FieldType::Json => Some(json_value(value.clone())),
        }
    };

    let coerced = match coerced {
        Some(v) => v,
        None if options.strict => {
            return Err(ConvertError::Uncoercible {
                field: field.name.clone(),
                value: value.to_string(),
                expected: field.field_type,
            })
        }
        None => {
            tracing::debug!(
                "Value {} can't be coerced for field '{}', storing null",
                value,
                field.name
            );
            Value::Null
        }
    };

    match coerced {
        Value::String(s) => finish_text(s, field, options).map(Value::String),
        other => Ok(other),
    }
}

fn finish_text(
    text: String,
    field: &FieldInfo,
    options: &RowOptions,
) -> std::result::Result<String, ConvertError> {
    let mut text = if options.strip { text.trim().to_string() } else { text };
    if options.clean_unicode {
        if let Ok(repaired) = clean_text(&text) {
            text = repaired;
        }
    }
    if let Some(max) = field.max_length {
        let len = text.chars().count();
        if len > max {
            if options.strict {
                return Err(ConvertError::TooLong {
                    field: field.name.clone(),
                    len,
                    max,
                });
            }
            tracing::warn!(
                "⚠ Truncating '{}' value from {} to {} characters",
                field.name,
                len,
                max
            );
            text = text.chars().take(max).collect();
        }
    }
    Ok(text)
}

fn text_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn integer_value(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral))
            .map(Value::from),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| parse_float(s).and_then(integral))
            .map(Value::from),
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        _ => None,
    }
}

fn integral(x: f64) -> Option<i64> {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        Some(x as i64)
    } else {
        None
    }
}

fn real_value(value: &Value) -> Option<Value> {
    let x = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float(s),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }?;
    serde_json::Number::from_f64(x).map(Value::Number)
}

fn boolean_value(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Some(Value::Bool(false)),
            Some(x) if x == 1.0 => Some(Value::Bool(true)),
            _ => None,
        },
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "on" => Some(Value::Bool(true)),
            "false" | "f" | "no" | "n" | "0" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn json_value(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Foreign keys are stored as the related record's key, integer when it parses as one
fn related_key(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => integer_value(value),
        Value::String(s) => Some(
            s.parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
        ),
        _ => None,
    }
}

/// Custom per-record import, tried before the generic field-by-field conversion.
///
/// Returning an error makes the engine fall back to [`record_from_row`].
pub trait ImportHook {
    fn import_row(&self, row: &Row, fields: &[FieldInfo]) -> Result<Record>;
}

impl<F> ImportHook for F
where
    F: Fn(&Row, &[FieldInfo]) -> Result<Record>,
{
    fn import_row(&self, row: &Row, fields: &[FieldInfo]) -> Result<Record> {
        self(row, fields)
    }
}
