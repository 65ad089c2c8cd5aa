//! Helpers for integration tests.
#![allow(dead_code)]

use std::io::Write;

use serde_json::json;
use tempfile::NamedTempFile;

use semdedup::domain::record::RecordId;
use semdedup::index::VectorStore;

pub use semdedup::testing::{HashingEmbedder, dataset_of};

/// JSONL file with one `{"text": ...}` object per entry.
pub fn jsonl_file(texts: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    for text in texts {
        writeln!(file, "{}", json!({ "text": text, "source": "fixture" })).expect("write line");
    }
    file
}

pub fn store_of(vectors: &[Vec<f32>]) -> VectorStore {
    let mut store = VectorStore::new();
    for (id, vector) in vectors.iter().enumerate() {
        store
            .insert(RecordId::new(id as u64), vector.clone())
            .expect("insert");
    }
    store
}

/// Two tight groups of 2-d points around `(1, 0)` and `(0, 1)`.
pub fn two_blobs(first: usize, second: usize) -> VectorStore {
    let mut vectors = Vec::new();
    for step in 0..first {
        vectors.push(vec![1.0, step as f32 * 0.02]);
    }
    for step in 0..second {
        vectors.push(vec![step as f32 * 0.02, 1.0]);
    }
    store_of(&vectors)
}
