//! Centroid-based partitioning (k-means) of the vector store.
//!
//! Centroids start from a farthest-first traversal whose first pick is drawn
//! from `seed`. Each iteration assigns every vector to its nearest centroid
//! and moves each centroid to the mean of its members. A centroid left without
//! members is moved onto the vector farthest from its nearest live centroid.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Deserialize;

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::{Metric, VectorStore};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub metric: Metric,
    pub max_iterations: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            max_iterations: 100,
        }
    }
}

/// Cluster label of every vector that took part in a partitioning run.
#[derive(Clone, Debug)]
pub struct ClusterAssignment {
    labels: BTreeMap<RecordId, usize>,
    n_clusters: usize,
    iterations: usize,
    converged: bool,
}

impl ClusterAssignment {
    pub fn label(&self, id: RecordId) -> Option<usize> {
        self.labels.get(&id).copied()
    }

    /// `(id, label)` pairs in ascending id order.
    pub fn labels(&self) -> impl Iterator<Item = (RecordId, usize)> + '_ {
        self.labels.iter().map(|(id, label)| (*id, *label))
    }

    pub fn members(&self, label: usize) -> Vec<RecordId> {
        self.labels
            .iter()
            .filter(|(_, assigned)| **assigned == label)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Member count per label, indexed by label.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for label in self.labels.values() {
            sizes[*label] += 1;
        }
        sizes
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Partition every vector of `store` into `n_clusters` groups.
///
/// `n_clusters` must lie in `1..=store.len()`.
pub fn partition(
    store: &VectorStore,
    n_clusters: usize,
    seed: u64,
    config: &PartitionConfig,
) -> CoreResult<ClusterAssignment> {
    if n_clusters == 0 || n_clusters > store.len() {
        return Err(CoreError::invalid(format!(
            "n_clusters must be between 1 and {}, got {n_clusters}",
            store.len()
        )));
    }
    if config.max_iterations == 0 {
        return Err(CoreError::invalid("max_iterations must be at least 1"));
    }

    let metric = config.metric;
    let ids: Vec<RecordId> = store.ids();
    let points: Vec<Vec<f32>> = store
        .all()
        .map(|(_, vector)| metric.prepare(vector))
        .collect();

    let mut centroids = farthest_first(&points, n_clusters, seed, metric);
    let mut labels: Vec<usize> = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;
        let next: Vec<usize> = points
            .par_iter()
            .map(|point| nearest(point, &centroids, metric).0)
            .collect();
        if next == labels {
            converged = true;
            break;
        }
        labels = next;
        centroids = recompute_centroids(&points, &labels, &centroids, metric);
    }

    if !converged {
        log::warn!(
            "k-means stopped after {iterations} iterations without converging (n_clusters={n_clusters})"
        );
    }

    Ok(ClusterAssignment {
        labels: ids.into_iter().zip(labels).collect(),
        n_clusters,
        iterations,
        converged,
    })
}

fn farthest_first(points: &[Vec<f32>], k: usize, seed: u64, metric: Metric) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let first = rng.random_range(0..points.len());
    let mut centroids = vec![points[first].clone()];
    let mut closest: Vec<f32> = points
        .iter()
        .map(|point| metric.distance(point, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let pick = argmax(&closest, |_| true).unwrap_or(0);
        let centroid = points[pick].clone();
        for (distance, point) in closest.iter_mut().zip(points) {
            *distance = distance.min(metric.distance(point, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

fn recompute_centroids(
    points: &[Vec<f32>],
    labels: &[usize],
    previous: &[Vec<f32>],
    metric: Metric,
) -> Vec<Vec<f32>> {
    let dimension = points[0].len();
    let mut sums = vec![vec![0.0_f32; dimension]; previous.len()];
    let mut counts = vec![0_usize; previous.len()];
    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (sum, value) in sums[label].iter_mut().zip(point) {
            *sum += value;
        }
    }

    let mut centroids: Vec<Option<Vec<f32>>> = sums
        .into_iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            (count > 0).then(|| {
                sum.into_iter()
                    .map(|value| value / count as f32)
                    .collect::<Vec<f32>>()
            })
        })
        .collect();

    let empty: Vec<usize> = (0..centroids.len())
        .filter(|&cluster| centroids[cluster].is_none())
        .collect();
    if empty.is_empty() {
        return centroids.into_iter().flatten().collect();
    }

    let live: Vec<Vec<f32>> = centroids.iter().flatten().cloned().collect();
    let mut taken = vec![false; points.len()];
    let mut closest: Vec<f32> = points
        .iter()
        .map(|point| nearest(point, &live, metric).1)
        .collect();
    for cluster in empty {
        let Some(pick) = argmax(&closest, |idx| !taken[idx]) else {
            centroids[cluster] = Some(previous[cluster].clone());
            continue;
        };
        log::debug!("Reseeding empty cluster {cluster} at point {pick}");
        taken[pick] = true;
        let reseed = points[pick].clone();
        for (distance, point) in closest.iter_mut().zip(points) {
            *distance = distance.min(metric.distance(point, &reseed));
        }
        centroids[cluster] = Some(reseed);
    }

    centroids.into_iter().flatten().collect()
}

/// Index and distance of the nearest centroid; ties go to the lower index.
fn nearest(point: &[f32], centroids: &[Vec<f32>], metric: Metric) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (idx, centroid) in centroids.iter().enumerate() {
        let distance = metric.distance(point, centroid);
        if distance < best.1 {
            best = (idx, distance);
        }
    }
    best
}

/// First index holding the largest value among those accepted by `allowed`.
fn argmax(values: &[f32], allowed: impl Fn(usize) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if !allowed(idx) {
            continue;
        }
        if best.is_none_or(|(_, top)| value > top) {
            best = Some((idx, value));
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(sizes: &[(usize, [f32; 2])]) -> VectorStore {
        let mut store = VectorStore::new();
        let mut id = 0_u64;
        for (size, center) in sizes {
            for step in 0..*size {
                let jitter = step as f32 * 0.01;
                store
                    .insert(
                        RecordId::new(id),
                        vec![center[0] + jitter, center[1] - jitter],
                    )
                    .expect("insert");
                id += 1;
            }
        }
        store
    }

    #[test]
    fn single_cluster_labels_everything_alike() {
        let store = blobs(&[(6, [1.0, 0.0]), (4, [0.0, 1.0])]);

        let assignment = partition(&store, 1, 7, &PartitionConfig::default()).expect("partition");

        assert_eq!(assignment.len(), 10);
        assert!(assignment.labels().all(|(_, label)| label == 0));
        assert!(assignment.converged());
    }

    #[test]
    fn separated_blobs_keep_their_sizes_for_any_seed() {
        let store = blobs(&[(6, [1.0, 0.0]), (4, [0.0, 1.0])]);

        for seed in 0..20 {
            let assignment =
                partition(&store, 2, seed, &PartitionConfig::default()).expect("partition");
            let mut sizes = assignment.sizes();
            sizes.sort_unstable();
            assert_eq!(sizes, vec![4, 6], "seed {seed}");
        }
    }

    #[test]
    fn one_cluster_per_well_separated_vector() {
        let mut store = VectorStore::new();
        let directions = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [-1.0, 0.0, 0.0]];
        for (id, direction) in directions.iter().enumerate() {
            store
                .insert(RecordId::new(id as u64), direction.to_vec())
                .expect("insert");
        }

        let assignment = partition(&store, 4, 3, &PartitionConfig::default()).expect("partition");

        assert_eq!(assignment.sizes(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn rejects_cluster_counts_out_of_range() {
        let store = blobs(&[(3, [1.0, 0.0])]);

        assert!(matches!(
            partition(&store, 0, 1, &PartitionConfig::default()),
            Err(CoreError::InvalidParameter(_))
        ));
        assert!(matches!(
            partition(&store, 4, 1, &PartitionConfig::default()),
            Err(CoreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn same_seed_gives_same_labels() {
        let store = blobs(&[(5, [1.0, 0.2]), (5, [0.2, 1.0]), (5, [-1.0, 0.0])]);

        let first = partition(&store, 3, 11, &PartitionConfig::default()).expect("partition");
        let second = partition(&store, 3, 11, &PartitionConfig::default()).expect("partition");

        assert_eq!(
            first.labels().collect::<Vec<_>>(),
            second.labels().collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_cluster_is_reseeded_on_farthest_point() {
        let points = vec![vec![0.0, 0.0], vec![0.1, 0.0], vec![10.0, 0.0]];
        let labels = vec![0, 0, 0];
        let previous = vec![vec![0.0, 0.0], vec![50.0, 50.0]];

        let centroids = recompute_centroids(&points, &labels, &previous, Metric::Euclidean);

        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids[1], vec![10.0, 0.0]);
    }

    #[test]
    fn euclidean_partition_splits_distant_groups() {
        let mut store = VectorStore::new();
        let points = [[0.0, 0.0], [0.5, 0.0], [0.0, 0.5], [20.0, 20.0], [20.5, 20.0]];
        for (id, point) in points.iter().enumerate() {
            store
                .insert(RecordId::new(id as u64), point.to_vec())
                .expect("insert");
        }
        let config = PartitionConfig {
            metric: Metric::Euclidean,
            ..PartitionConfig::default()
        };

        let assignment = partition(&store, 2, 0, &config).expect("partition");

        let near = assignment.label(RecordId::new(0));
        assert_eq!(assignment.label(RecordId::new(1)), near);
        assert_eq!(assignment.label(RecordId::new(2)), near);
        assert_ne!(assignment.label(RecordId::new(3)), near);
        assert_eq!(assignment.label(RecordId::new(3)), assignment.label(RecordId::new(4)));
    }
}
