//! Writes clustering and deduplication decisions back onto the dataset.
//!
//! Every entry point validates the whole decision set against the current
//! dataset first and only then mutates, so a failing call leaves records and
//! vectors untouched.

use std::collections::HashSet;

use serde_json::Value;

use crate::domain::record::RecordId;
use crate::error::{CoreError, CoreResult};
use crate::index::VectorStore;
use crate::processing::cluster::ClusterAssignment;
use crate::processing::dedup::DuplicateGroup;
use crate::repository::{RecordReader, RecordWriter};

/// Set `field` on each listed record.
pub fn apply_field<W>(repo: &mut W, field: &str, values: Vec<(RecordId, Value)>) -> CoreResult<usize>
where
    W: RecordReader + RecordWriter,
{
    ensure_live(repo, values.iter().map(|(id, _)| *id))?;

    let applied = values.len();
    for (id, value) in values {
        repo.set_field(id, field, value)?;
    }
    Ok(applied)
}

/// Store each record's cluster label in `field`.
pub fn apply_cluster_labels<W>(
    repo: &mut W,
    assignment: &ClusterAssignment,
    field: &str,
) -> CoreResult<usize>
where
    W: RecordReader + RecordWriter,
{
    let values = assignment
        .labels()
        .map(|(id, label)| (id, Value::from(label)))
        .collect();
    apply_field(repo, field, values)
}

/// Remove every record labelled `label`.
///
/// The assignment is consumed: once its members are gone it no longer
/// describes the dataset.
pub fn remove_cluster<W>(
    repo: &mut W,
    store: &mut VectorStore,
    assignment: ClusterAssignment,
    label: usize,
) -> CoreResult<Vec<RecordId>>
where
    W: RecordReader + RecordWriter,
{
    if label >= assignment.n_clusters() {
        return Err(CoreError::invalid(format!(
            "cluster {label} does not exist (n_clusters={})",
            assignment.n_clusters()
        )));
    }
    let members = assignment.members(label);
    ensure_live(repo, members.iter().copied())?;

    remove_records(repo, store, &members)?;
    Ok(members)
}

/// Drop every non-survivor of `groups`. Returns the removed ids in ascending
/// order.
pub fn apply_duplicates<W>(
    repo: &mut W,
    store: &mut VectorStore,
    groups: &[DuplicateGroup],
) -> CoreResult<Vec<RecordId>>
where
    W: RecordReader + RecordWriter,
{
    let mut seen = HashSet::new();
    for group in groups {
        if group.members.iter().min() != Some(&group.survivor) {
            return Err(CoreError::invalid(format!(
                "group survivor {} is not its lowest id",
                group.survivor
            )));
        }
        for &id in &group.members {
            if !seen.insert(id) {
                return Err(CoreError::invalid(format!(
                    "record {id} belongs to more than one duplicate group"
                )));
            }
        }
    }
    ensure_live(repo, seen.iter().copied())?;

    let mut removed: Vec<RecordId> = groups.iter().flat_map(|group| group.removed()).collect();
    removed.sort_unstable();
    remove_records(repo, store, &removed)?;
    Ok(removed)
}

fn ensure_live<R, I>(repo: &R, ids: I) -> CoreResult<()>
where
    R: RecordReader,
    I: IntoIterator<Item = RecordId>,
{
    match ids.into_iter().find(|id| !repo.is_live(*id)) {
        Some(dead) => Err(CoreError::NotFound(dead)),
        None => Ok(()),
    }
}

fn remove_records<W>(repo: &mut W, store: &mut VectorStore, ids: &[RecordId]) -> CoreResult<()>
where
    W: RecordReader + RecordWriter,
{
    for &id in ids {
        repo.remove(id)?;
        if store.contains(id) {
            store.remove(id)?;
        }
    }
    Ok(())
}
