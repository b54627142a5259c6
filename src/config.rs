// ABOUTME: Job configuration loaded from TOML and threaded explicitly through every command
// ABOUTME: Holds batch sizes, null/NaN/blank markers, resolver tuning and fallback encodings

use crate::columns::RealOptions;
use crate::encoding::encodings_from_labels;
use crate::error::Result;
use encoding_rs::Encoding;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings shared by transfer, diff, statistics and name-resolution commands.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Records per transfer batch
    pub batch_len: usize,
    /// Records per diff batch
    pub diff_batch_len: usize,
    pub null_markers: Vec<String>,
    pub nan_markers: Vec<String>,
    pub blank_markers: Vec<String>,
    /// Values a diff treats as equivalent to null
    pub diff_nulls: Vec<Value>,
    /// Minimum fuzzy score (0-100) for a confident name match
    pub score_cutoff: f64,
    /// How much better a synonym must score to replace the literal name's match
    pub root_preference: f64,
    /// Encoding labels tried, in order, when bytes are not valid UTF-8
    pub fallback_encodings: Vec<String>,
    /// Field name -> alternative spellings
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Directory for resumable-transfer checkpoints; unset disables checkpoints
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        let real = RealOptions::default();
        Self {
            batch_len: 1000,
            diff_batch_len: 999,
            null_markers: real.null_markers,
            nan_markers: real.nan_markers,
            blank_markers: real.blank_markers,
            diff_nulls: vec![Value::from(0), Value::from(0.0), Value::from("")],
            score_cutoff: 50.0,
            root_preference: 1.02,
            fallback_encodings: vec!["windows-1252".to_string()],
            synonyms: BTreeMap::new(),
            checkpoint_dir: None,
        }
    }
}

impl EtlConfig {
    /// Coercion options built from the configured markers
    pub fn real_options(&self) -> RealOptions {
        RealOptions {
            null_markers: self.null_markers.clone(),
            nan_markers: self.nan_markers.clone(),
            blank_markers: self.blank_markers.clone(),
            ..RealOptions::default()
        }
    }

    /// Resolved fallback encodings; unknown labels are skipped with a warning
    pub fn fallbacks(&self) -> Vec<&'static Encoding> {
        encodings_from_labels(&self.fallback_encodings)
    }

    /// Checkpoint file for a `source` -> `destination` transfer, if checkpoints are enabled
    pub fn checkpoint_path(&self, source: &str, destination: &str) -> Option<PathBuf> {
        self.checkpoint_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}__{}.checkpoint.json", source, destination)))
    }
}

/// Parse a configuration from TOML text
pub fn parse_config(text: &str) -> Result<EtlConfig> {
    Ok(toml::from_str(text)?)
}

/// Load configuration from a TOML file
///
/// # Arguments
///
/// * `path` - Path to the TOML file
///
/// # Returns
///
/// The parsed configuration; keys missing from the file take their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML for [`EtlConfig`].
///
/// # Examples
///
/// ```no_run
/// # use tabular_etl::config::load_config;
/// let config = load_config("etl.toml")?;
/// println!("batch size: {}", config.batch_len);
/// # Ok::<(), tabular_etl::error::EtlError>(())
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EtlConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = parse_config(&text)?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EtlConfig::default();
        assert_eq!(config.batch_len, 1000);
        assert_eq!(config.diff_batch_len, 999);
        assert_eq!(config.score_cutoff, 50.0);
        assert_eq!(config.fallbacks(), vec![encoding_rs::WINDOWS_1252]);
        assert!(config.checkpoint_path("a", "b").is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            batch_len = 50
            checkpoint_dir = "/tmp/etl"

            [synonyms]
            zipcode = ["zip", "postal_code"]
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_len, 50);
        assert_eq!(config.diff_batch_len, 999);
        assert_eq!(config.synonyms["zipcode"], vec!["zip", "postal_code"]);
        assert_eq!(
            config.checkpoint_path("src", "dst"),
            Some(PathBuf::from("/tmp/etl/src__dst.checkpoint.json"))
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = parse_config("batch_len = \"many\"").unwrap_err();
        assert!(matches!(err, crate::error::EtlError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "null_markers = [\"-\"]").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.real_options().null_markers, vec!["-".to_string()]);
    }
}
