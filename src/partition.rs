// ABOUTME: Batch partitioner splitting a keyed record set into bounded key-range batches
// ABOUTME: Loads only the keys into memory and fetches each batch lazily by inclusive range

use crate::error::{EtlError, Result};
use crate::record::{Key, KeyRange, Record};
use crate::store::{RecordFilter, RecordStore};
use serde::{Deserialize, Serialize};

/// Fencepost plan for partitioning a store: one inclusive key range per batch.
///
/// The plan holds no records, so it can be computed once, persisted in a checkpoint,
/// and replayed from any batch offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batch_len: usize,
    pub total_keys: usize,
    pub ranges: Vec<KeyRange>,
}

impl BatchPlan {
    /// Compute fenceposts over sorted keys.
    ///
    /// Batch `j` spans `keys[j * batch_len] ..= keys[(j + 1) * batch_len - 1]`, the last
    /// batch absorbing the remainder. Ranges are inclusive, so when equal keys straddle a
    /// fencepost every copy lands in both adjoining batches. That over-inclusion is
    /// kept rather than deduplicated.
    pub fn from_sorted_keys(keys: &[Key], batch_len: usize) -> Result<Self> {
        if batch_len == 0 {
            return Err(EtlError::InvalidArgument(
                "batch_len must be at least 1".to_string(),
            ));
        }
        let n = keys.len();
        let n_batches = n.div_ceil(batch_len);
        let mut ranges = Vec::with_capacity(n_batches);
        for j in 0..n_batches {
            let low = j * batch_len;
            let high = ((j + 1) * batch_len).min(n) - 1;
            ranges.push(KeyRange::new(keys[low].clone(), keys[high].clone()));
        }
        Ok(Self {
            batch_len,
            total_keys: n,
            ranges,
        })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Plan continuing a run whose first batches covered `done`, with `tail` planned
    /// over the keys after the last committed one
    pub fn resumed(done: Vec<KeyRange>, tail: BatchPlan) -> Self {
        let total_keys = done.len() * tail.batch_len + tail.total_keys;
        let mut ranges = done;
        ranges.extend(tail.ranges);
        Self {
            batch_len: tail.batch_len,
            total_keys,
            ranges,
        }
    }

    /// Number of keys the fenceposts of batch `index` were cut around
    pub fn expected_len(&self, index: usize) -> usize {
        if index + 1 < self.ranges.len() {
            self.batch_len
        } else {
            self.total_keys - self.batch_len * index
        }
    }
}

/// One partition of the source: its position, key range and fetched records
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub range: KeyRange,
    pub records: Vec<Record>,
}

impl Batch {
    /// Records minus those under `previous_high`, which the preceding batch already
    /// yielded through a shared fencepost key
    pub fn new_records<'b>(&'b self, previous_high: Option<&'b Key>) -> impl Iterator<Item = &'b Record> + 'b {
        self.records
            .iter()
            .filter(move |r| previous_high.is_none() || r.pk.as_ref() != previous_high)
    }
}

/// Lazy iterator over the batches of a store
pub struct Batches<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    plan: BatchPlan,
    next: usize,
}

impl<'a, S: RecordStore + ?Sized> Batches<'a, S> {
    pub fn new(store: &'a S, plan: BatchPlan) -> Self {
        Self {
            store,
            plan,
            next: 0,
        }
    }

    /// Skip ahead so the next batch yielded is `index`
    pub fn resume_at(mut self, index: usize) -> Self {
        self.next = index.min(self.plan.len());
        self
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }
}

impl<S: RecordStore + ?Sized> Iterator for Batches<'_, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        let range = self.plan.ranges.get(index)?.clone();
        self.next += 1;
        let fetched = self
            .store
            .iterate(&RecordFilter::KeyRange(range.clone()))
            .map(|records| Batch {
                index,
                range,
                records,
            });
        Some(fetched)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len() - self.next;
        (remaining, Some(remaining))
    }
}

/// Plan the batches of `store` without fetching any records
pub fn plan_partition<S: RecordStore + ?Sized>(store: &S, batch_len: usize) -> Result<BatchPlan> {
    let keys = store.keys()?;
    if keys.is_empty() {
        return Err(EtlError::EmptySource {
            store: store.name().to_string(),
        });
    }
    let plan = BatchPlan::from_sorted_keys(&keys, batch_len)?;
    tracing::debug!(
        "Split {} key(s) from '{}' into {} batch(es) of at most {}",
        plan.total_keys,
        store.name(),
        plan.len(),
        batch_len
    );
    Ok(plan)
}

/// Plan the batches of the keys of `store` strictly greater than `after`; the plan
/// is empty when no such key remains
pub fn plan_partition_after<S: RecordStore + ?Sized>(store: &S, batch_len: usize, after: &Key) -> Result<BatchPlan> {
    let keys: Vec<Key> = store.keys()?.into_iter().filter(|k| k > after).collect();
    BatchPlan::from_sorted_keys(&keys, batch_len)
}

/// Partition `store` into key-range batches of at most `batch_len` keys.
///
/// Only the keys are loaded up front; each batch's records are fetched when the
/// iterator reaches it. An empty store is an [`EtlError::EmptySource`] error.
///
/// # Examples
///
/// ```
/// # use tabular_etl::partition::partition;
/// # use tabular_etl::record::{FieldInfo, FieldType, Key, Record};
/// # use tabular_etl::store::MemoryStore;
/// let records = (1..=25).map(|i| Record::new(Some(Key::Int(i)))).collect();
/// let store = MemoryStore::with_records("t", vec![], records);
///
/// let sizes: Vec<usize> = partition(&store, 10)?
///     .map(|b| b.map(|b| b.records.len()))
///     .collect::<Result<_, _>>()?;
/// assert_eq!(sizes, vec![10, 10, 5]);
/// # Ok::<(), tabular_etl::error::EtlError>(())
/// ```
pub fn partition<S: RecordStore + ?Sized>(store: &S, batch_len: usize) -> Result<Batches<'_, S>> {
    let plan = plan_partition(store, batch_len)?;
    Ok(Batches::new(store, plan))
}

/// Chunk any iterator into vectors of at most `batch_len` items
pub fn chunked<I: Iterator>(iter: I, batch_len: usize) -> Chunks<I> {
    Chunks {
        iter,
        batch_len: batch_len.max(1),
    }
}

pub struct Chunks<I> {
    iter: I,
    batch_len: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<I::Item> = self.iter.by_ref().take(self.batch_len).collect();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}
