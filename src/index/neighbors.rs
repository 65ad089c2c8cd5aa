//! Nearest-neighbour index built from a [`VectorStore`] snapshot.
//!
//! Small snapshots are searched exhaustively; larger ones go through a usearch
//! HNSW graph. Either way the index is immutable: it remembers the store
//! version it was built from and refuses to answer once the store has been
//! mutated.

use std::collections::BTreeSet;

use serde::Deserialize;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::metric::{DISTANCE_TOLERANCE, Metric};
use crate::index::store::{StoreVersion, VectorStore};

/// Initial neighbour count for radius queries answered by the HNSW graph.
const RADIUS_PROBE: usize = 16;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: Metric,
    /// Snapshots with at most this many vectors use exhaustive search.
    pub exact_search_limit: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            exact_search_limit: 4_096,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
        }
    }
}

enum Backend {
    Exact(Vec<(RecordId, Vec<f32>)>),
    Hnsw(Index),
}

pub struct NeighborIndex {
    metric: Metric,
    dimension: Option<usize>,
    len: usize,
    backend: Backend,
    built_version: u64,
    version: StoreVersion,
}

impl NeighborIndex {
    /// Build from the current contents of `store`.
    pub fn build(store: &VectorStore, config: &IndexConfig) -> CoreResult<Self> {
        let metric = config.metric;
        let built_version = store.version();
        let len = store.len();

        let backend = if len <= config.exact_search_limit {
            Backend::Exact(
                store
                    .all()
                    .map(|(id, vector)| (id, metric.prepare(vector)))
                    .collect(),
            )
        } else {
            Backend::Hnsw(build_hnsw(store, config)?)
        };

        log::debug!(
            "Built {} neighbour index over {len} vectors (metric={}, store_version={built_version})",
            match backend {
                Backend::Exact(_) => "exact",
                Backend::Hnsw(_) => "hnsw",
            },
            metric.as_str()
        );

        Ok(Self {
            metric,
            dimension: store.dimension(),
            len,
            backend,
            built_version,
            version: store.version_handle(),
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn built_version(&self) -> u64 {
        self.built_version
    }

    pub fn is_stale(&self) -> bool {
        self.version.current() != self.built_version
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.backend, Backend::Exact(_))
    }

    /// The `k` closest ids, ascending by distance with ties broken by id.
    pub fn query_knn(&self, vector: &[f32], k: usize) -> CoreResult<Vec<(RecordId, f32)>> {
        self.check_query(vector)?;
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }
        let query = self.metric.prepare(vector);

        let mut results = match &self.backend {
            Backend::Exact(entries) => self.scan(entries, &query),
            Backend::Hnsw(index) => self.search_hnsw(index, &query, k.min(self.len))?,
        };
        results.truncate(k);
        Ok(results)
    }

    /// Every id within distance `radius` of `vector`.
    pub fn query_radius(&self, vector: &[f32], radius: f32) -> CoreResult<BTreeSet<RecordId>> {
        self.check_query(vector)?;
        if radius < 0.0 || radius.is_nan() {
            return Err(CoreError::invalid(format!(
                "radius must be non-negative, got {radius}"
            )));
        }
        if self.len == 0 {
            return Ok(BTreeSet::new());
        }
        let query = self.metric.prepare(vector);
        let limit = radius + DISTANCE_TOLERANCE;

        let within = match &self.backend {
            Backend::Exact(entries) => entries
                .iter()
                .filter(|(_, candidate)| self.metric.prepared_distance(&query, candidate) <= limit)
                .map(|(id, _)| *id)
                .collect(),
            Backend::Hnsw(index) => {
                // Widen the probe until the farthest hit falls outside the radius.
                let mut k = RADIUS_PROBE.min(self.len);
                loop {
                    let hits = self.search_hnsw(index, &query, k)?;
                    let exhausted = hits.len() < k || k == self.len;
                    let spilled = hits.last().is_some_and(|(_, distance)| *distance > limit);
                    if exhausted || spilled {
                        break hits
                            .into_iter()
                            .filter(|(_, distance)| *distance <= limit)
                            .map(|(id, _)| id)
                            .collect();
                    }
                    k = (k * 2).min(self.len);
                }
            }
        };
        Ok(within)
    }

    fn check_query(&self, vector: &[f32]) -> CoreResult<()> {
        let current = self.version.current();
        if current != self.built_version {
            return Err(CoreError::StaleIndex {
                built: self.built_version,
                current,
            });
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(CoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    fn scan(&self, entries: &[(RecordId, Vec<f32>)], query: &[f32]) -> Vec<(RecordId, f32)> {
        let mut results: Vec<(RecordId, f32)> = entries
            .iter()
            .map(|(id, candidate)| (*id, self.metric.prepared_distance(query, candidate)))
            .collect();
        sort_hits(&mut results);
        results
    }

    fn search_hnsw(&self, index: &Index, query: &[f32], k: usize) -> CoreResult<Vec<(RecordId, f32)>> {
        let neighbors = index
            .search(query, k)
            .map_err(|error| CoreError::Index(error.to_string()))?;

        let mut results: Vec<(RecordId, f32)> = neighbors
            .keys
            .iter()
            .zip(neighbors.distances.iter())
            .map(|(&key, &distance)| {
                let distance = match self.metric {
                    Metric::Cosine => distance.clamp(0.0, 2.0),
                    Metric::Euclidean => distance.max(0.0).sqrt(),
                };
                (RecordId::new(key), distance)
            })
            .collect();
        sort_hits(&mut results);
        Ok(results)
    }
}

fn build_hnsw(store: &VectorStore, config: &IndexConfig) -> CoreResult<Index> {
    let dimensions = store
        .dimension()
        .ok_or_else(|| CoreError::invalid("cannot build an index without a dimension"))?;

    let index = Index::new(&IndexOptions {
        dimensions,
        metric: match config.metric {
            Metric::Cosine => MetricKind::Cos,
            Metric::Euclidean => MetricKind::L2sq,
        },
        quantization: ScalarKind::F32,
        connectivity: config.connectivity,
        expansion_add: config.expansion_add,
        expansion_search: config.expansion_search,
        ..Default::default()
    })
    .map_err(|error| CoreError::Index(error.to_string()))?;

    index
        .reserve(store.len())
        .map_err(|error| CoreError::Index(error.to_string()))?;

    for (id, vector) in store.all() {
        index
            .add(id.get(), vector)
            .map_err(|error| CoreError::Index(error.to_string()))?;
    }

    Ok(index)
}

fn sort_hits(hits: &mut [(RecordId, f32)]) {
    hits.sort_by(|(id_a, dist_a), (id_b, dist_b)| {
        dist_a.total_cmp(dist_b).then_with(|| id_a.cmp(id_b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(vectors: &[(u64, Vec<f32>)]) -> VectorStore {
        let mut store = VectorStore::new();
        for (id, vector) in vectors {
            store
                .insert(RecordId::new(*id), vector.clone())
                .expect("insert");
        }
        store
    }

    fn line_store() -> VectorStore {
        store_of(&[
            (10, vec![0.0, 1.0, 0.0]),
            (20, vec![1.0, 0.0, 0.0]),
            (30, vec![0.5, 0.5, 0.0]),
        ])
    }

    #[test]
    fn knn_returns_empty_for_empty_store() {
        let store = VectorStore::new();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        let result = index.query_knn(&[1.0, 0.0, 0.0], 1).expect("query");

        assert!(result.is_empty());
    }

    #[test]
    fn knn_returns_best_neighbor_first() {
        let store = line_store();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        let result = index.query_knn(&[1.0, 0.0, 0.0], 3).expect("query");

        let ids: Vec<u64> = result.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![20, 30, 10]);
        assert!(result.windows(2).all(|pair| pair[0].1 <= pair[1].1));
    }

    #[test]
    fn knn_breaks_ties_by_ascending_id() {
        let store = store_of(&[
            (7, vec![0.0, 1.0]),
            (3, vec![0.0, 1.0]),
            (5, vec![0.0, 1.0]),
        ]);
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        let result = index.query_knn(&[0.0, 1.0], 3).expect("query");

        let ids: Vec<u64> = result.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn radius_collects_ids_within_distance() {
        let store = line_store();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        // cos(45deg) ~ 0.707, so distance ~ 0.293 to id 30.
        let near = index.query_radius(&[1.0, 0.0, 0.0], 0.3).expect("query");
        let exact = index.query_radius(&[1.0, 0.0, 0.0], 0.0).expect("query");

        assert_eq!(
            near.into_iter().map(RecordId::get).collect::<Vec<_>>(),
            vec![20, 30]
        );
        assert_eq!(
            exact.into_iter().map(RecordId::get).collect::<Vec<_>>(),
            vec![20]
        );
    }

    #[test]
    fn queries_fail_after_store_mutation() {
        let mut store = line_store();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        store.remove(RecordId::new(20)).expect("remove");

        assert!(index.is_stale());
        assert!(matches!(
            index.query_knn(&[1.0, 0.0, 0.0], 1),
            Err(CoreError::StaleIndex { .. })
        ));
        assert!(matches!(
            index.query_radius(&[1.0, 0.0, 0.0], 0.1),
            Err(CoreError::StaleIndex { .. })
        ));

        let rebuilt = NeighborIndex::build(&store, &IndexConfig::default()).expect("rebuild");
        let result = rebuilt.query_knn(&[1.0, 0.0, 0.0], 3).expect("query");
        assert!(result.iter().all(|(id, _)| id.get() != 20));
    }

    #[test]
    fn query_dimension_must_match() {
        let store = line_store();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        assert!(matches!(
            index.query_knn(&[1.0, 0.0], 1),
            Err(CoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn euclidean_metric_uses_l2_distance() {
        let store = store_of(&[(0, vec![0.0, 0.0]), (1, vec![3.0, 4.0]), (2, vec![1.0, 0.0])]);
        let config = IndexConfig {
            metric: Metric::Euclidean,
            ..IndexConfig::default()
        };
        let index = NeighborIndex::build(&store, &config).expect("build");

        let result = index.query_knn(&[0.0, 0.0], 3).expect("query");

        assert_eq!(result[0], (RecordId::new(0), 0.0));
        assert_eq!(result[1], (RecordId::new(2), 1.0));
        assert!((result[2].1 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn hnsw_backend_finds_nearest_neighbor() {
        let store = line_store();
        let config = IndexConfig {
            exact_search_limit: 0,
            ..IndexConfig::default()
        };
        let index = NeighborIndex::build(&store, &config).expect("build");

        let result = index.query_knn(&[1.0, 0.0, 0.0], 1).expect("query");
        let radius = index.query_radius(&[1.0, 0.0, 0.0], 0.3).expect("query");

        assert!(!index.is_exact());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, RecordId::new(20));
        assert!(radius.contains(&RecordId::new(20)));
        assert!(radius.contains(&RecordId::new(30)));
        assert!(!radius.contains(&RecordId::new(10)));
    }

    #[test]
    fn hnsw_radius_widens_past_the_first_search() {
        let store = crate::testing::clustered_store(60, 20).expect("fixture");
        let hnsw = NeighborIndex::build(
            &store,
            &IndexConfig {
                exact_search_limit: 0,
                ..IndexConfig::default()
            },
        )
        .expect("build hnsw");
        let exact = NeighborIndex::build(&store, &IndexConfig::default()).expect("build exact");
        let query = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

        let approximate = hnsw.query_radius(&query, 0.1).expect("hnsw radius");
        let expected = exact.query_radius(&query, 0.1).expect("exact radius");

        assert!(!hnsw.is_exact());
        assert_eq!(expected.len(), 60);
        assert!(expected.len() > 2 * RADIUS_PROBE);
        assert_eq!(approximate, expected);
    }

    #[test]
    fn repeated_queries_are_identical() {
        let store = line_store();
        let index = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

        let first = index.query_knn(&[0.3, 0.7, 0.0], 2).expect("query");
        let second = index.query_knn(&[0.3, 0.7, 0.0], 2).expect("query");

        assert_eq!(first, second);
    }
}
