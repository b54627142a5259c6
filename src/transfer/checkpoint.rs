// ABOUTME: Resumable-transfer checkpoints persisted as JSON after every committed batch
// ABOUTME: Writes go through a temp file and rename so a killed process never leaves a torn file

use crate::error::Result;
use crate::partition::BatchPlan;
use crate::record::{Key, KeyRange};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Progress of one source -> destination transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: String,
    pub destination: String,
    pub batch_len: usize,
    pub total_batches: usize,
    /// Batches fully written; the next run starts at this index
    pub completed_batches: usize,
    pub transferred: usize,
    /// Key ranges of the written batches, in order
    #[serde(default)]
    pub completed: Vec<KeyRange>,
}

impl Checkpoint {
    pub fn new(source: &str, destination: &str, plan: &BatchPlan) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            batch_len: plan.batch_len,
            total_batches: plan.len(),
            completed_batches: 0,
            transferred: 0,
            completed: Vec::new(),
        }
    }

    /// Whether this checkpoint belongs to the same source, destination and batch size
    pub fn same_job(&self, source: &str, destination: &str, batch_len: usize) -> bool {
        self.source == source
            && self.destination == destination
            && self.batch_len == batch_len
            && self.completed.len() == self.completed_batches
    }

    /// Whether `plan` cuts the already-written batches exactly as the saved run did
    pub fn matches(&self, source: &str, destination: &str, plan: &BatchPlan) -> bool {
        self.same_job(source, destination, plan.batch_len) && plan.ranges.starts_with(&self.completed)
    }

    /// Highest key of the last written batch
    pub fn last_high(&self) -> Option<&Key> {
        self.completed.last().map(|r| &r.high)
    }

    /// Note batch `range` as written, with `transferred` records written so far
    pub fn record_batch(&mut self, range: KeyRange, transferred: usize) {
        self.completed.push(range);
        self.completed_batches = self.completed.len();
        self.transferred = transferred;
    }

    /// Read a checkpoint; a missing file is `Ok(None)`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the checkpoint file at `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Delete the checkpoint file if present
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
