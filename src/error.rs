// ABOUTME: Error taxonomy for the batch transfer, diff and statistics core
// ABOUTME: Job-level and per-record failures share one enum so callers can match on them

use crate::record::Key;
use thiserror::Error;

/// Errors raised by the library core.
///
/// Per-record failures (`ParseFailure`, `TransformFailure`) are normally recovered
/// locally and only surface when the caller asked for strict mode. Job-level failures
/// (`EmptySource`, `IntegrityDrift` under strict mode) always surface.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("'{store}' is empty: no records with a non-null key")]
    EmptySource { store: String },

    #[error("ragged input: column lengths range from {min} to {max}")]
    RaggedInput { min: usize, max: usize },

    #[error("cannot coerce value {value:?} in column '{column}' row {row} to a real number")]
    ParseFailure {
        column: String,
        row: usize,
        value: String,
    },

    #[error("failed to transform record #{index}{}: {reason}", key_suffix(.key))]
    TransformFailure {
        index: usize,
        key: Option<Key>,
        reason: String,
    },

    #[error(
        "row count of '{store}' drifted during replace: before={before}, after={after} \
         (a concurrent writer may have touched the same rows)"
    )]
    IntegrityDrift {
        store: String,
        before: usize,
        after: usize,
    },

    #[error("asked to delete {requested} key(s) from '{store}' but {matched} row(s) matched")]
    DeleteMismatch {
        store: String,
        requested: usize,
        matched: usize,
    },

    #[error("no confident match for '{name}' (best guess {best:?}, score {score:.1})")]
    LookupAmbiguous {
        name: String,
        best: Option<String>,
        score: f64,
    },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

fn key_suffix(key: &Option<Key>) -> String {
    match key {
        Some(k) => format!(" (key {})", k),
        None => String::new(),
    }
}

impl EtlError {
    /// True for failures scoped to a single record, which lenient jobs skip and count
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            EtlError::ParseFailure { .. } | EtlError::TransformFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_failure_message_includes_key() {
        let err = EtlError::TransformFailure {
            index: 3,
            key: Some(Key::Int(42)),
            reason: "bad date".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("key 42"));
        assert!(msg.contains("bad date"));
    }

    #[test]
    fn test_per_record_classification() {
        let parse = EtlError::ParseFailure {
            column: "x".into(),
            row: 0,
            value: "abc".into(),
        };
        assert!(parse.is_per_record());
        let empty = EtlError::EmptySource {
            store: "t".into(),
        };
        assert!(!empty.is_per_record());
    }
}
