use std::sync::LazyLock;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use regex::Regex;
use xxhash_rust::xxh3::xxh3_64;

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::metric::normalize_embedding;
use crate::index::{ContentSignature, VectorStore};
use crate::repository::RecordReader;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid punctuation regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Produces one vector per input text, in input order.
pub trait Embedder {
    fn embed(&mut self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;
}

impl Embedder for TextEmbedding {
    fn embed(&mut self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        TextEmbedding::embed(self, texts, None)
            .map_err(|error| CoreError::Embedding(format!("{error:?}")))
    }
}

/// Map a configured model name onto a fastembed model.
pub fn embedding_model(name: &str) -> CoreResult<EmbeddingModel> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => Err(CoreError::invalid(format!(
            "unknown embedding model `{other}`"
        ))),
    }
}

pub fn load_text_embedding(name: &str) -> CoreResult<TextEmbedding> {
    let model = embedding_model(name)?;
    TextEmbedding::try_new(InitOptions::new(model))
        .map_err(|error| CoreError::Embedding(format!("failed to load {name}: {error:?}")))
}

/// A record whose text could not be embedded.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingFailure {
    pub id: RecordId,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub embedded: usize,
    pub failures: Vec<EmbeddingFailure>,
}

/// Lower-case, drop punctuation and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Hash of the normalized text used by the membership filter.
pub fn content_signature(text: &str) -> ContentSignature {
    ContentSignature(xxh3_64(normalize_text(text).as_bytes()))
}

/// Embed the `field` text of every live record into a fresh [`VectorStore`].
///
/// Records are processed in ascending id order in batches of `batch_size`.
/// When a batch call fails each of its records is retried alone so that one
/// bad text only costs its own embedding. Fails outright when no record could
/// be embedded, or when a designated field is missing or not text.
pub fn embed_records<R, E>(
    repo: &R,
    field: &str,
    embedder: &mut E,
    batch_size: usize,
) -> CoreResult<(VectorStore, EmbeddingReport)>
where
    R: RecordReader,
    E: Embedder + ?Sized,
{
    if batch_size == 0 {
        return Err(CoreError::invalid("embedding batch size must be at least 1"));
    }

    let ids = repo.live_ids();
    let mut texts = Vec::with_capacity(ids.len());
    for &id in &ids {
        texts.push(repo.text(id, field)?.to_string());
    }

    let mut store = VectorStore::new();
    let mut report = EmbeddingReport::default();

    for (batch_ids, batch_texts) in ids.chunks(batch_size).zip(texts.chunks(batch_size)) {
        match embed_batch(embedder, batch_texts) {
            Ok(vectors) => {
                for (&id, vector) in batch_ids.iter().zip(vectors) {
                    store.insert(id, normalize_embedding(&vector))?;
                    report.embedded += 1;
                }
            }
            Err(error) => {
                log::warn!(
                    "Batch of {} records failed to embed ({error}); retrying individually",
                    batch_ids.len()
                );
                for (&id, text) in batch_ids.iter().zip(batch_texts) {
                    match embed_batch(embedder, std::slice::from_ref(text)) {
                        Ok(mut vectors) => {
                            if let Some(vector) = vectors.pop() {
                                store.insert(id, normalize_embedding(&vector))?;
                                report.embedded += 1;
                            }
                        }
                        Err(error) => {
                            log::warn!("Failed to embed record {id}: {error}");
                            report.failures.push(EmbeddingFailure {
                                id,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    if !ids.is_empty() && report.embedded == 0 {
        return Err(CoreError::Embedding(format!(
            "all {} records failed to embed",
            ids.len()
        )));
    }

    Ok((store, report))
}

fn embed_batch<E>(embedder: &mut E, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>
where
    E: Embedder + ?Sized,
{
    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(CoreError::Embedding(format!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}
