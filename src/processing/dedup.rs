//! Duplicate graph resolution.
//!
//! Candidates whose normalized text was already seen earlier in the same pass
//! are joined to that first occurrence without a radius query, provided their
//! vectors are also within the threshold of each other. Every
//! other candidate issues a radius query of `1 - threshold` against the
//! neighbour index; each hit becomes an edge. Connected components of the
//! resulting graph are the duplicate groups and the lowest id of a group
//! survives.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::metric::DISTANCE_TOLERANCE;
use crate::index::{ContentSignature, MembershipFilter, NeighborIndex, VectorStore};
use crate::processing::embedding::content_signature;
use crate::repository::RecordReader;

/// Records transitively linked by above-threshold similarity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Lowest id of the group.
    pub survivor: RecordId,
    /// All ids of the group in ascending order, survivor first.
    pub members: Vec<RecordId>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Members that lose to the survivor.
    pub fn removed(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.members.iter().copied().skip(1)
    }
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// Groups ordered by survivor id.
    pub groups: Vec<DuplicateGroup>,
    pub candidates: usize,
    /// Candidates joined to an earlier identical text without a query.
    pub exact_repeats: usize,
    /// Filter hits with no matching earlier text in this pass.
    pub filter_unconfirmed: usize,
    pub radius_queries: usize,
}

impl Resolution {
    pub fn removed_count(&self) -> usize {
        self.groups.iter().map(|group| group.len() - 1).sum()
    }
}

/// Group `ids` into duplicate groups at similarity `threshold` in `(0, 1]`.
///
/// `filter` is consulted and extended with the content signature of every
/// candidate. Fails before doing any work when the index is stale, the
/// threshold is out of range, or a candidate lacks an embedding or text.
pub fn resolve<R>(
    repo: &R,
    field: &str,
    store: &VectorStore,
    index: &NeighborIndex,
    filter: &mut MembershipFilter,
    ids: &[RecordId],
    threshold: f32,
) -> CoreResult<Resolution>
where
    R: RecordReader,
{
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(CoreError::invalid(format!(
            "threshold must be in (0, 1], got {threshold}"
        )));
    }
    if index.is_stale() {
        return Err(CoreError::StaleIndex {
            built: index.built_version(),
            current: store.version(),
        });
    }

    let mut candidates = ids.to_vec();
    candidates.sort_unstable();
    candidates.dedup();

    let mut signatures = Vec::with_capacity(candidates.len());
    for &id in &candidates {
        store.get(id)?;
        signatures.push(content_signature(repo.text(id, field)?));
    }

    let mut resolution = Resolution {
        candidates: candidates.len(),
        ..Resolution::default()
    };
    let radius = 1.0 - threshold;
    let metric = index.metric();
    let mut graph = UnionFind::new(candidates.len());
    let mut first_seen: HashMap<ContentSignature, usize> = HashMap::new();
    let mut queried: Vec<usize> = Vec::new();

    for (position, signature) in signatures.into_iter().enumerate() {
        if filter.might_contain(signature) {
            if let Some(&first) = first_seen.get(&signature) {
                // Same normalized text still has to be within the radius.
                let distance = metric.prepared_distance(
                    &metric.prepare(store.get(candidates[first])?),
                    &metric.prepare(store.get(candidates[position])?),
                );
                if distance <= radius + DISTANCE_TOLERANCE {
                    graph.union(first, position);
                    resolution.exact_repeats += 1;
                    continue;
                }
            } else {
                resolution.filter_unconfirmed += 1;
            }
        }
        filter.add(signature);
        first_seen.entry(signature).or_insert(position);
        queried.push(position);
    }

    let neighborhoods: Vec<(usize, Vec<RecordId>)> = queried
        .par_iter()
        .map(|&position| -> CoreResult<(usize, Vec<RecordId>)> {
            let vector = store.get(candidates[position])?;
            let hits = index.query_radius(vector, radius)?;
            Ok((position, hits.into_iter().collect()))
        })
        .collect::<CoreResult<_>>()?;
    resolution.radius_queries = neighborhoods.len();

    for (position, hits) in neighborhoods {
        for hit in hits {
            if let Ok(other) = candidates.binary_search(&hit) {
                graph.union(position, other);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<RecordId>> = BTreeMap::new();
    for (position, &id) in candidates.iter().enumerate() {
        components.entry(graph.find(position)).or_default().push(id);
    }
    let mut groups: Vec<DuplicateGroup> = components
        .into_values()
        .map(|members| DuplicateGroup {
            survivor: members[0],
            members,
        })
        .collect();
    groups.sort_by_key(|group| group.survivor);
    resolution.groups = groups;

    Ok(resolution)
}

/// Disjoint sets over `0..n` with union by size and path halving.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut root_a, mut root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        if self.size[root_a] < self.size[root_b] {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b] = root_a;
        self.size[root_a] += self.size[root_b];
    }
}
