use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};

/// Shared mutation counter of a [`VectorStore`].
///
/// Indexes keep a handle so they can detect that the store moved on after
/// they were built.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoreVersion(Arc<AtomicU64>);

impl StoreVersion {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Ids at or above this bound are rejected by [`VectorStore::insert`].
pub const MAX_RECORD_ID: u64 = 1 << 32;

/// One fixed-dimension embedding per live record, addressed by record id.
///
/// Slots are indexed by id, so inserts are amortized O(1) and iteration is in
/// ascending id order.
#[derive(Debug, Default)]
pub struct VectorStore {
    dimension: Option<usize>,
    slots: Vec<Option<Vec<f32>>>,
    len: usize,
    version: StoreVersion,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose dimension is fixed up front instead of by the first insert.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Insert or overwrite the vector for `id`.
    pub fn insert(&mut self, id: RecordId, vector: Vec<f32>) -> CoreResult<()> {
        if vector.is_empty() {
            return Err(CoreError::invalid(format!(
                "empty embedding for record {id}"
            )));
        }
        if id.get() >= MAX_RECORD_ID {
            return Err(CoreError::invalid(format!(
                "record id {id} exceeds the store limit of {MAX_RECORD_ID}"
            )));
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }

        let slot = id.index();
        if slot >= self.slots.len() {
            self.slots
                .try_reserve(slot + 1 - self.slots.len())
                .map_err(|error| CoreError::invalid(format!("cannot address record {id}: {error}")))?;
            self.slots.resize(slot + 1, None);
        }
        if self.slots[slot].replace(vector).is_none() {
            self.len += 1;
        }
        self.version.bump();
        Ok(())
    }

    pub fn get(&self, id: RecordId) -> CoreResult<&[f32]> {
        self.slots
            .get(id.index())
            .and_then(|slot| slot.as_deref())
            .ok_or(CoreError::NotFound(id))
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.get(id).is_ok()
    }

    pub fn remove(&mut self, id: RecordId) -> CoreResult<Vec<f32>> {
        let removed = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(CoreError::NotFound(id))?;
        self.len -= 1;
        self.version.bump();
        Ok(removed)
    }

    /// All `(id, vector)` pairs in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = (RecordId, &[f32])> {
        self.slots.iter().enumerate().filter_map(|(slot, vector)| {
            vector
                .as_deref()
                .map(|vector| (RecordId::new(slot as u64), vector))
        })
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.all().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of mutations applied so far.
    pub fn version(&self) -> u64 {
        self.version.current()
    }

    pub(crate) fn version_handle(&self) -> StoreVersion {
        self.version.clone()
    }
}
