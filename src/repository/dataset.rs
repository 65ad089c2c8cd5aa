use serde_json::{Map, Value};

use crate::domain::record::{Record, RecordId};
use crate::error::{CoreError, CoreResult};
use crate::repository::{RecordReader, RecordWriter};

/// In-memory record collection.
///
/// Removal only flips a liveness flag so ids stay valid positions for every
/// structure keyed by them.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    records: Vec<Record>,
    live: Vec<bool>,
    removed: usize,
}

impl Dataset {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let records: Vec<Record> = rows
            .into_iter()
            .enumerate()
            .map(|(position, fields)| Record::new(RecordId::new(position as u64), fields))
            .collect();
        let live = vec![true; records.len()];
        Self {
            records,
            live,
            removed: 0,
        }
    }

    /// Number of records ever loaded, dead ones included.
    pub fn total_len(&self) -> usize {
        self.records.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .zip(self.live.iter())
            .filter_map(|(record, &live)| live.then_some(record))
    }
}

impl RecordReader for Dataset {
    fn get(&self, id: RecordId) -> CoreResult<&Record> {
        if !self.is_live(id) {
            return Err(CoreError::NotFound(id));
        }
        Ok(&self.records[id.index()])
    }

    fn is_live(&self, id: RecordId) -> bool {
        self.live.get(id.index()).copied().unwrap_or(false)
    }

    fn live_ids(&self) -> Vec<RecordId> {
        self.iter_live().map(|record| record.id).collect()
    }

    fn live_count(&self) -> usize {
        self.records.len() - self.removed
    }
}

impl RecordWriter for Dataset {
    fn set_field(&mut self, id: RecordId, name: &str, value: Value) -> CoreResult<()> {
        if !self.is_live(id) {
            return Err(CoreError::NotFound(id));
        }
        self.records[id.index()]
            .fields
            .insert(name.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> CoreResult<()> {
        if !self.is_live(id) {
            return Err(CoreError::NotFound(id));
        }
        self.live[id.index()] = false;
        self.removed += 1;
        Ok(())
    }
}
