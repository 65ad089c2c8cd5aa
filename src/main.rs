use std::env;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::block_in_place;

use semdedup::models::config::CuratorConfig;
use semdedup::processing::curator::Curator;
use semdedup::processing::embedding::load_text_embedding;
use semdedup::processing::{JobMessage, process_job_message};
use semdedup::repository::Dataset;
use semdedup::repository::jsonl::load_jsonl;
use semdedup::repository::snapshot::load_snapshot;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config_path =
        PathBuf::from(env::var("SEMDEDUP_CONFIG").unwrap_or_else(|_| "semdedup.yaml".to_string()));
    let config = match CuratorConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    let dataset = match load_jsonl(&config.dataset_path) {
        Ok(dataset) => dataset,
        Err(e) => {
            log::error!(
                "Failed to load dataset {}: {e}",
                config.dataset_path.display()
            );
            std::process::exit(1);
        }
    };

    let mut curator = Curator::new(dataset, config);
    if !restore_snapshot(&mut curator) {
        let embedded = block_in_place(|| {
            let mut embedder = load_text_embedding(&curator.config().embedding_model)?;
            curator.embed(&mut embedder)
        });
        if let Err(e) = embedded {
            log::error!("Failed to embed dataset: {e}");
            std::process::exit(1);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read job stream: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JobMessage>(&line) {
            Ok(parsed) => block_in_place(|| process_job_message(&mut curator, parsed)),
            Err(e) => log::error!("Failed to parse JSON: {e}"),
        }
    }

    process_job_message(&mut curator, JobMessage::Save);
}

/// Restore vectors from the configured snapshot. Returns `false` when the
/// dataset has to be embedded instead.
fn restore_snapshot(curator: &mut Curator<Dataset>) -> bool {
    let config = curator.config();
    let (Some(path), Some(dimension)) = (config.snapshot_path.clone(), config.embedding_dimension)
    else {
        return false;
    };
    if !path.exists() {
        return false;
    }

    let metric = config.index.metric;
    let id_limit = curator.repo().total_len() as u64;
    match load_snapshot(&path, metric, dimension, id_limit)
        .and_then(|store| curator.restore_vectors(store))
    {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "Ignoring snapshot {}: {e}; embedding from scratch",
                path.display()
            );
            false
        }
    }
}
