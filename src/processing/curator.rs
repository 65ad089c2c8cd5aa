//! Curation session over one dataset.
//!
//! [`Curator`] owns the record collection together with the structures
//! derived from it: the vector store, the membership filter, the neighbour
//! index and the latest cluster assignment. Operations that remove records
//! leave the index stale. The next dedup call rebuilds it, while direct
//! queries refuse to run until [`Curator::rebuild_index`] is called.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::{MembershipFilter, NeighborIndex, VectorStore};
use crate::models::config::CuratorConfig;
use crate::processing::classify::Classifier;
use crate::processing::cluster::{ClusterAssignment, partition};
use crate::processing::dedup::resolve;
use crate::processing::embedding::{Embedder, EmbeddingReport, embed_records};
use crate::processing::mutator;
use crate::repository::{RecordReader, RecordWriter};

#[derive(Debug, Default, PartialEq)]
pub struct DedupStats {
    pub candidates: usize,
    pub groups: usize,
    pub removed: usize,
    pub exact_repeats: usize,
    pub filter_unconfirmed: usize,
    pub radius_queries: usize,
}

#[derive(Debug, Default, PartialEq)]
pub struct ClusterStats {
    pub clusters: usize,
    pub iterations: usize,
    pub converged: bool,
    pub sizes: Vec<usize>,
}

pub struct Curator<R> {
    repo: R,
    config: CuratorConfig,
    store: VectorStore,
    filter: Option<MembershipFilter>,
    index: Option<NeighborIndex>,
    assignment: Option<ClusterAssignment>,
}

impl<R> Curator<R>
where
    R: RecordReader + RecordWriter,
{
    pub fn new(repo: R, config: CuratorConfig) -> Self {
        Self {
            repo,
            config,
            store: VectorStore::new(),
            filter: None,
            index: None,
            assignment: None,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn into_repo(self) -> R {
        self.repo
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn index(&self) -> Option<&NeighborIndex> {
        self.index.as_ref()
    }

    pub fn assignment(&self) -> Option<&ClusterAssignment> {
        self.assignment.as_ref()
    }

    /// Embed the configured text field of every live record, replacing any
    /// previous vectors.
    pub fn embed<E>(&mut self, embedder: &mut E) -> CoreResult<EmbeddingReport>
    where
        E: Embedder + ?Sized,
    {
        log::info!(
            "Received Embed for {} records (field={})",
            self.repo.live_count(),
            self.config.text_field
        );

        let (store, report) = embed_records(
            &self.repo,
            &self.config.text_field,
            embedder,
            self.config.embedding_batch_size,
        )?;
        self.replace_store(store);

        log::info!(
            "Finished Embed: embedded={}, failed={}, dimension={}",
            report.embedded,
            report.failures.len(),
            self.store.dimension().unwrap_or_default()
        );
        if !report.failures.is_empty() {
            log::warn!(
                "{} records have no embedding and are excluded from clustering and dedup",
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Adopt previously persisted vectors. Every id must be a live record.
    pub fn restore_vectors(&mut self, store: VectorStore) -> CoreResult<()> {
        if let Some(dead) = store.all().map(|(id, _)| id).find(|id| !self.repo.is_live(*id)) {
            return Err(CoreError::NotFound(dead));
        }
        log::info!("Restored {} vectors", store.len());
        self.replace_store(store);
        Ok(())
    }

    pub fn rebuild_index(&mut self) -> CoreResult<()> {
        let index = NeighborIndex::build(&self.store, &self.config.index)?;
        log::info!(
            "Rebuilt neighbour index over {} vectors (metric={}, exact={})",
            index.len(),
            index.metric().as_str(),
            index.is_exact()
        );
        self.index = Some(index);
        Ok(())
    }

    pub fn query_knn(&self, vector: &[f32], k: usize) -> CoreResult<Vec<(RecordId, f32)>> {
        self.built_index()?.query_knn(vector, k)
    }

    pub fn query_radius(&self, vector: &[f32], radius: f32) -> CoreResult<BTreeSet<RecordId>> {
        self.built_index()?.query_radius(vector, radius)
    }

    /// Partition the embedded records and label them in the cluster field.
    pub fn cluster(&mut self, n_clusters: usize, seed: u64) -> CoreResult<ClusterStats> {
        log::info!("Received Cluster: n_clusters={n_clusters}, seed={seed}");

        let assignment = partition(
            &self.store,
            n_clusters,
            seed,
            &self.config.partition_config(),
        )?;
        let stats = ClusterStats {
            clusters: assignment.n_clusters(),
            iterations: assignment.iterations(),
            converged: assignment.converged(),
            sizes: assignment.sizes(),
        };
        let field = &self.config.cluster_field;
        mutator::apply_cluster_labels(&mut self.repo, &assignment, field)?;
        self.assignment = Some(assignment);

        log::info!(
            "Finished Cluster: clusters={}, iterations={}, converged={}, sizes={:?}",
            stats.clusters,
            stats.iterations,
            stats.converged,
            stats.sizes
        );
        Ok(stats)
    }

    /// Write the latest cluster labels into `field`.
    pub fn apply_clusters(&mut self, field: &str) -> CoreResult<usize> {
        let assignment = self
            .assignment
            .as_ref()
            .ok_or_else(|| CoreError::invalid("no cluster assignment to apply"))?;
        mutator::apply_cluster_labels(&mut self.repo, assignment, field)
    }

    /// Remove every record of cluster `label` from the latest assignment.
    /// The assignment is discarded afterwards.
    pub fn remove_cluster(&mut self, label: usize) -> CoreResult<usize> {
        log::info!("Received RemoveCluster: label={label}");

        let n_clusters = self
            .assignment
            .as_ref()
            .map(ClusterAssignment::n_clusters)
            .ok_or_else(|| CoreError::invalid("no cluster assignment to remove from"))?;
        if label >= n_clusters {
            return Err(CoreError::invalid(format!(
                "cluster {label} does not exist (n_clusters={n_clusters})"
            )));
        }
        let Some(assignment) = self.assignment.take() else {
            return Err(CoreError::invalid("no cluster assignment to remove from"));
        };
        let removed = mutator::remove_cluster(&mut self.repo, &mut self.store, assignment, label)?;

        log::info!(
            "Finished RemoveCluster: label={label}, removed={}, remaining={}",
            removed.len(),
            self.repo.live_count()
        );
        Ok(removed.len())
    }

    /// Collapse near-duplicates at the configured threshold.
    pub fn dedup(&mut self) -> CoreResult<DedupStats> {
        let threshold = self.config.dedup_threshold;
        self.dedup_with_threshold(threshold)
    }

    pub fn dedup_with_threshold(&mut self, threshold: f32) -> CoreResult<DedupStats> {
        log::info!(
            "Received Dedup: threshold={threshold}, candidates={}",
            self.store.len()
        );

        self.ensure_fresh_index()?;
        if self.filter.is_none() {
            self.filter = Some(MembershipFilter::new(
                self.config.filter_capacity.max(self.store.len()),
                self.config.filter_false_positive_rate,
            )?);
        }

        let resolution = {
            let (Some(index), Some(filter)) = (self.index.as_ref(), self.filter.as_mut()) else {
                return Err(CoreError::invalid("dedup state was not initialised"));
            };
            let candidates = self.store.ids();
            resolve(
                &self.repo,
                &self.config.text_field,
                &self.store,
                index,
                filter,
                &candidates,
                threshold,
            )?
        };
        let removed = mutator::apply_duplicates(&mut self.repo, &mut self.store, &resolution.groups)?;
        if !removed.is_empty() && self.assignment.take().is_some() {
            log::debug!("Discarded cluster assignment after removing duplicates");
        }

        let stats = DedupStats {
            candidates: resolution.candidates,
            groups: resolution.groups.len(),
            removed: removed.len(),
            exact_repeats: resolution.exact_repeats,
            filter_unconfirmed: resolution.filter_unconfirmed,
            radius_queries: resolution.radius_queries,
        };

        log::info!(
            "Finished Dedup: candidates={}, groups={}, removed={}, exact_repeats={}, radius_queries={}",
            stats.candidates,
            stats.groups,
            stats.removed,
            stats.exact_repeats,
            stats.radius_queries
        );
        if stats.filter_unconfirmed > 0 {
            log::debug!(
                "Dedup had {} membership filter hits without an earlier identical text",
                stats.filter_unconfirmed
            );
        }
        Ok(stats)
    }

    /// Label the `field` text of every live record with `classifier` into
    /// `output_field`. Nothing is written unless every record classifies.
    pub fn classify<C>(
        &mut self,
        field: &str,
        output_field: &str,
        classifier: &C,
    ) -> CoreResult<usize>
    where
        C: Classifier + ?Sized,
    {
        let mut labels = Vec::with_capacity(self.repo.live_count());
        for id in self.repo.live_ids() {
            let text = self.repo.text(id, field)?;
            labels.push((id, Value::from(classifier.classify(text)?)));
        }
        let applied = mutator::apply_field(&mut self.repo, output_field, labels)?;

        log::info!("Finished Classify: field={output_field}, labelled={applied}");
        Ok(applied)
    }

    /// Store the UTF-8 byte length of each listed text field in
    /// `__byte_count__<field>`.
    pub fn count_bytes(&mut self, fields: &[String]) -> CoreResult<usize> {
        let ids = self.repo.live_ids();
        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            let mut counts = Vec::with_capacity(ids.len());
            for &id in &ids {
                counts.push((id, Value::from(self.repo.text(id, field)?.len())));
            }
            columns.push((format!("__byte_count__{field}"), counts));
        }
        for (name, counts) in columns {
            mutator::apply_field(&mut self.repo, &name, counts)?;
        }

        log::info!("Finished CountBytes: fields={fields:?}, records={}", ids.len());
        Ok(ids.len())
    }

    fn replace_store(&mut self, store: VectorStore) {
        self.store = store;
        self.index = None;
        self.assignment = None;
    }

    fn built_index(&self) -> CoreResult<&NeighborIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| CoreError::invalid("neighbour index has not been built"))
    }

    fn ensure_fresh_index(&mut self) -> CoreResult<()> {
        match &self.index {
            Some(index) if !index.is_stale() => Ok(()),
            Some(index) => {
                log::warn!(
                    "Neighbour index is stale (built at version {}, store at {}); rebuilding",
                    index.built_version(),
                    self.store.version()
                );
                self.rebuild_index()
            }
            None => self.rebuild_index(),
        }
    }
}
