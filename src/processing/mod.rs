use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::processing::curator::Curator;
use crate::repository::Dataset;
use crate::repository::jsonl::save_jsonl;
use crate::repository::snapshot::save_snapshot;

pub mod classify;
pub mod cluster;
pub mod curator;
pub mod dedup;
pub mod embedding;
pub mod mutator;

/// One curation job read from the control stream.
#[derive(Deserialize, Debug, PartialEq)]
pub enum JobMessage {
    /// Deduplicate at the given threshold, or the configured one.
    Dedup(Option<f32>),
    Cluster(ClusterRequest),
    RemoveCluster(usize),
    /// Record the byte length of each listed text field.
    CountBytes(Vec<String>),
    /// Persist the current vectors to the configured snapshot path.
    Snapshot,
    /// Write the live records to the configured output path.
    Save,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct ClusterRequest {
    pub n_clusters: usize,
    #[serde(default)]
    pub seed: u64,
}

/// Run one job against the session. Failures are logged and leave the
/// session usable for the next job.
pub fn process_job_message(curator: &mut Curator<Dataset>, message: JobMessage) {
    let name = format!("{message:?}");
    if let Err(error) = run_job(curator, message) {
        log::error!("Job {name} failed: {error}");
    }
}

fn run_job(curator: &mut Curator<Dataset>, message: JobMessage) -> CoreResult<()> {
    match message {
        JobMessage::Dedup(Some(threshold)) => {
            curator.dedup_with_threshold(threshold)?;
        }
        JobMessage::Dedup(None) => {
            curator.dedup()?;
        }
        JobMessage::Cluster(request) => {
            curator.cluster(request.n_clusters, request.seed)?;
        }
        JobMessage::RemoveCluster(label) => {
            curator.remove_cluster(label)?;
        }
        JobMessage::CountBytes(fields) => {
            curator.count_bytes(&fields)?;
        }
        JobMessage::Snapshot => {
            let path = curator
                .config()
                .snapshot_path
                .clone()
                .ok_or_else(|| CoreError::invalid("snapshot_path is not configured"))?;
            save_snapshot(curator.store(), curator.config().index.metric, &path)?;
        }
        JobMessage::Save => {
            save_jsonl(curator.repo(), &curator.config().output_path)?;
        }
    }
    Ok(())
}
