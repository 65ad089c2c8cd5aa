//! Configuration model loaded from external sources.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::SIMILARITY_THRESHOLD;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexConfig;
use crate::processing::cluster::PartitionConfig;

/// Environment variables with this prefix override file settings, e.g.
/// `SEMDEDUP_DEDUP_THRESHOLD=0.9` or `SEMDEDUP_INDEX__METRIC=euclidean`.
pub const ENV_PREFIX: &str = "SEMDEDUP";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
/// Settings for one curation session over a dataset.
pub struct CuratorConfig {
    pub dataset_path: PathBuf,
    pub output_path: PathBuf,
    /// Field whose text is embedded and fingerprinted.
    pub text_field: String,
    /// Field that receives cluster labels.
    pub cluster_field: String,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    /// Expected embedding dimension; required to restore a snapshot.
    pub embedding_dimension: Option<usize>,
    pub snapshot_path: Option<PathBuf>,
    pub dedup_threshold: f32,
    pub filter_capacity: usize,
    pub filter_false_positive_rate: f64,
    pub kmeans_max_iterations: usize,
    pub index: IndexConfig,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("dataset.jsonl"),
            output_path: PathBuf::from("dataset.curated.jsonl"),
            text_field: "text".to_string(),
            cluster_field: "__cluster".to_string(),
            embedding_model: "all-minilm-l6-v2".to_string(),
            embedding_batch_size: 64,
            embedding_dimension: None,
            snapshot_path: None,
            dedup_threshold: SIMILARITY_THRESHOLD,
            filter_capacity: 1_000_000,
            filter_false_positive_rate: 0.01,
            kmeans_max_iterations: 100,
            index: IndexConfig::default(),
        }
    }
}

impl CuratorConfig {
    /// Read `path` (YAML, optional) and apply environment overrides.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let config: CuratorConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(CoreError::invalid(format!(
                "dedup_threshold must be in (0, 1], got {}",
                self.dedup_threshold
            )));
        }
        if !(self.filter_false_positive_rate > 0.0 && self.filter_false_positive_rate < 1.0) {
            return Err(CoreError::invalid(format!(
                "filter_false_positive_rate must be in (0, 1), got {}",
                self.filter_false_positive_rate
            )));
        }
        if self.embedding_batch_size == 0 {
            return Err(CoreError::invalid("embedding_batch_size must be at least 1"));
        }
        if self.kmeans_max_iterations == 0 {
            return Err(CoreError::invalid("kmeans_max_iterations must be at least 1"));
        }
        if self.text_field.is_empty() || self.cluster_field.is_empty() {
            return Err(CoreError::invalid("field names must not be empty"));
        }
        Ok(())
    }

    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            metric: self.index.metric,
            max_iterations: self.kmeans_max_iterations,
        }
    }
}
