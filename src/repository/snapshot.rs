//! Binary snapshot of a [`VectorStore`].
//!
//! Layout: the `SDVS` magic, a little-endian `u32` format version, a `u32`
//! header length followed by a JSON header carrying the metric and dimension,
//! then for every vector its `u64` id and `dimension` little-endian `f32`s.
//! Loading checks the header against what the caller expects before reading a
//! single vector.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytemuck::cast_slice;
use serde::{Deserialize, Serialize};

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::{Metric, VectorStore};

const MAGIC: &[u8; 4] = b"SDVS";
const FORMAT_VERSION: u32 = 1;
const MAX_HEADER_LEN: u32 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotHeader {
    pub metric: Metric,
    pub dimension: usize,
    pub count: usize,
}

pub fn save_snapshot(store: &VectorStore, metric: Metric, path: &Path) -> CoreResult<()> {
    let dimension = store
        .dimension()
        .ok_or_else(|| CoreError::invalid("cannot snapshot a store without a dimension"))?;
    let header = serde_json::to_vec(&SnapshotHeader {
        metric,
        dimension,
        count: store.len(),
    })?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(header.len() as u32).to_le_bytes())?;
    writer.write_all(&header)?;
    for (id, vector) in store.all() {
        writer.write_all(&id.get().to_le_bytes())?;
        if cfg!(target_endian = "little") {
            writer.write_all(cast_slice(vector))?;
        } else {
            for value in vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
    }
    writer.flush()?;

    log::info!(
        "Saved {} vectors (dimension={dimension}, metric={}) to {}",
        store.len(),
        metric.as_str(),
        path.display()
    );
    Ok(())
}

/// Load a snapshot written with `expected_metric` and `expected_dimension`.
/// Every stored id must be below `id_limit`, normally the number of records
/// the dataset was loaded with.
pub fn load_snapshot(
    path: &Path,
    expected_metric: Metric,
    expected_dimension: usize,
    id_limit: u64,
) -> CoreResult<VectorStore> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CoreError::invalid(format!(
            "{} is not a vector snapshot",
            path.display()
        )));
    }
    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(CoreError::invalid(format!(
            "unsupported snapshot format version {version}"
        )));
    }
    let header_len = read_u32(&mut reader)?;
    if header_len > MAX_HEADER_LEN {
        return Err(CoreError::invalid(format!(
            "snapshot header of {header_len} bytes exceeds {MAX_HEADER_LEN}"
        )));
    }
    let mut header = vec![0u8; header_len as usize];
    reader.read_exact(&mut header)?;
    let header: SnapshotHeader = serde_json::from_slice(&header)?;

    if header.metric != expected_metric {
        return Err(CoreError::invalid(format!(
            "snapshot uses {} distance but {} was requested",
            header.metric.as_str(),
            expected_metric.as_str()
        )));
    }
    if header.dimension != expected_dimension {
        return Err(CoreError::DimensionMismatch {
            expected: expected_dimension,
            actual: header.dimension,
        });
    }

    let mut store = VectorStore::with_dimension(header.dimension);
    let mut id_bytes = [0u8; 8];
    let mut vector_bytes = vec![0u8; header.dimension * std::mem::size_of::<f32>()];
    for _ in 0..header.count {
        reader.read_exact(&mut id_bytes)?;
        reader.read_exact(&mut vector_bytes)?;
        let id = u64::from_le_bytes(id_bytes);
        if id >= id_limit {
            return Err(CoreError::invalid(format!(
                "snapshot holds record {id} but the dataset has {id_limit} records"
            )));
        }
        let vector: Vec<f32> = vector_bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        store.insert(RecordId::new(id), vector)?;
    }

    Ok(store)
}

fn read_u32(reader: &mut impl Read) -> CoreResult<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
