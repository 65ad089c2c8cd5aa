mod common;

use semdedup::domain::record::RecordId;
use semdedup::error::CoreError;
use semdedup::index::{IndexConfig, NeighborIndex};
use semdedup::models::config::CuratorConfig;
use semdedup::processing::cluster::{PartitionConfig, partition};
use semdedup::processing::curator::Curator;
use semdedup::repository::jsonl::{load_jsonl, save_jsonl};
use semdedup::repository::{Dataset, RecordReader};

use common::{HashingEmbedder, dataset_of, jsonl_file, two_blobs};

const CORPUS: [&str; 8] = [
    "hello world",
    "hello  world",
    "Hello World!",
    "the stock market fell sharply today",
    "the stock market fell sharply today.",
    "a recipe for lemon cake with poppy seeds",
    "migrating birds rest on the lake in autumn",
    "migrating birds rest on a lake in autumn",
];

fn embedded(dataset: Dataset) -> Curator<Dataset> {
    let mut curator = Curator::new(dataset, CuratorConfig::default());
    curator
        .embed(&mut HashingEmbedder::new(512))
        .expect("embed");
    curator
}

#[test]
fn dedup_keeps_lowest_id_of_each_group_and_saves_survivors() {
    let input = jsonl_file(&[
        "hello world",
        "hello  world",
        "Hello World!",
        "the stock market fell today",
    ]);
    let output = tempfile::NamedTempFile::new().expect("temp file");
    let mut curator = embedded(load_jsonl(input.path()).expect("load"));

    let stats = curator.dedup_with_threshold(0.9).expect("dedup");
    let written = save_jsonl(curator.repo(), output.path()).expect("save");

    assert_eq!(stats.candidates, 4);
    assert_eq!(stats.groups, 2);
    assert_eq!(stats.removed, 2);
    assert_eq!(written, 2);
    let reloaded = load_jsonl(output.path()).expect("reload");
    let texts: Vec<&str> = reloaded
        .iter_live()
        .filter_map(|record| record.field("text").and_then(|value| value.as_str()))
        .collect();
    assert_eq!(texts, vec!["hello world", "the stock market fell today"]);
}

#[test]
fn higher_threshold_never_removes_more() {
    let mut previous = usize::MAX;
    for threshold in [0.5, 0.7, 0.85, 0.95, 1.0] {
        let mut curator = embedded(dataset_of(&CORPUS));
        let stats = curator.dedup_with_threshold(threshold).expect("dedup");
        assert!(
            stats.removed <= previous,
            "threshold {threshold} removed {} after {previous}",
            stats.removed
        );
        previous = stats.removed;
    }
}

#[test]
fn dedup_is_idempotent() {
    let mut curator = embedded(dataset_of(&CORPUS));

    let first = curator.dedup_with_threshold(0.9).expect("first dedup");
    let second = curator.dedup_with_threshold(0.9).expect("second dedup");

    assert!(first.removed > 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.groups, second.candidates);
    assert_eq!(second.exact_repeats, 0);
    assert_eq!(second.filter_unconfirmed, second.candidates);
}

#[test]
fn separated_blobs_split_six_and_four_for_any_seed() {
    let store = two_blobs(6, 4);

    for seed in [0, 1, 7, 42, 1234] {
        let assignment =
            partition(&store, 2, seed, &PartitionConfig::default()).expect("partition");
        let mut sizes = assignment.sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![4, 6], "seed {seed}");
        let first_blob = assignment.label(RecordId::new(0));
        for id in 1..6 {
            assert_eq!(assignment.label(RecordId::new(id)), first_blob);
        }
    }
}

#[test]
fn removed_vector_never_returned_after_rebuild() {
    let mut store = two_blobs(6, 4);
    let removed = RecordId::new(2);
    let query = store.get(removed).expect("vector").to_vec();
    let stale = NeighborIndex::build(&store, &IndexConfig::default()).expect("build");

    store.remove(removed).expect("remove");

    assert!(matches!(
        stale.query_knn(&query, 3),
        Err(CoreError::StaleIndex { .. })
    ));
    for exact_search_limit in [4096, 0] {
        let config = IndexConfig {
            exact_search_limit,
            ..IndexConfig::default()
        };
        let index = NeighborIndex::build(&store, &config).expect("rebuild");
        let hits = index.query_knn(&query, 10).expect("knn");
        assert_eq!(hits.len(), 9);
        assert!(hits.iter().all(|(id, _)| *id != removed));
        assert!(!index.query_radius(&query, 2.0).expect("radius").contains(&removed));
    }
}

#[test]
fn removing_a_cluster_drops_exactly_its_members() {
    let mut curator = embedded(dataset_of(&[
        "apples oranges pears",
        "apples oranges pears and plums",
        "kernel scheduler interrupts",
        "kernel scheduler interrupts and threads",
        "kernel scheduler interrupt handlers",
    ]));

    curator.cluster(2, 3).expect("cluster");
    let assignment = curator.assignment().expect("assignment");
    let label = assignment.label(RecordId::new(2)).expect("label");
    let members = assignment.members(label);

    let removed = curator.remove_cluster(label).expect("remove cluster");

    assert_eq!(removed, members.len());
    for id in members {
        assert!(!curator.repo().is_live(id));
        assert!(!curator.store().contains(id));
    }
    assert_eq!(curator.repo().live_count(), 5 - removed);
}

#[test]
fn cluster_labels_are_written_into_records() {
    let mut curator = embedded(dataset_of(&CORPUS));

    let stats = curator.cluster(3, 9).expect("cluster");

    assert_eq!(stats.clusters, 3);
    assert_eq!(stats.sizes.iter().sum::<usize>(), CORPUS.len());
    for record in curator.repo().iter_live() {
        let label = record
            .field("__cluster")
            .and_then(|value| value.as_u64())
            .expect("cluster label");
        assert!(label < 3);
    }
}
