//! Deterministic fixtures shared by unit and integration tests.

use serde_json::{Map, Value, json};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::domain::record::RecordId;
use crate::error::CoreResult;
use crate::index::VectorStore;
use crate::processing::embedding::{Embedder, normalize_text};
use crate::repository::Dataset;

/// Feature-hashing embedder over words and character trigrams of the
/// normalized text. Texts that normalize identically embed identically.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let normalized = normalize_text(text);
        let mut vector = vec![0.0_f32; self.dimension];
        for word in normalized.split(' ').filter(|word| !word.is_empty()) {
            let bucket = xxh3_64_with_seed(word.as_bytes(), 1) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let gram: String = window.iter().collect();
            let bucket = xxh3_64_with_seed(gram.as_bytes(), 2) as usize % self.dimension;
            vector[bucket] += 0.5;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&mut self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

pub fn dataset_of(texts: &[&str]) -> Dataset {
    Dataset::from_rows(texts.iter().map(|text| {
        let mut fields: Map<String, Value> = Map::new();
        fields.insert("text".to_string(), json!(text));
        fields
    }))
}

/// Tight groups of 8-d vectors: `dense` points around the first axis, then
/// `per_axis` points around each of the seven other axes. Every point lies
/// within cosine distance 0.01 of its axis and about 1.0 from the others.
pub fn clustered_store(dense: usize, per_axis: usize) -> CoreResult<VectorStore> {
    let jitter = |i: usize, j: usize| 0.05 * (((i * 31 + j * 17) % 13) as f32 / 13.0 - 0.5);
    let points = (0..dense)
        .map(|i| (0, i))
        .chain((1..8).flat_map(|axis| (0..per_axis).map(move |i| (axis, i))));

    let mut store = VectorStore::new();
    for (id, (axis, i)) in points.enumerate() {
        let mut vector: Vec<f32> = (0..8).map(|j| jitter(i, j)).collect();
        vector[axis] = 1.0;
        store.insert(RecordId::new(id as u64), vector)?;
    }
    Ok(store)
}
