//! Newline-delimited JSON import and export of a [`Dataset`].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::repository::Dataset;

/// Load one record per non-blank line. Ids follow line order.
pub fn load_jsonl(path: &Path) -> CoreResult<Dataset> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows: Vec<Map<String, Value>> = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line)? {
            Value::Object(fields) => rows.push(fields),
            _ => {
                return Err(CoreError::invalid(format!(
                    "line {} of {} is not a JSON object",
                    line_number + 1,
                    path.display()
                )));
            }
        }
    }

    log::info!("Loaded {} records from {}", rows.len(), path.display());

    Ok(Dataset::from_rows(rows))
}

/// Write live records in id order; removed records are omitted.
pub fn save_jsonl(dataset: &Dataset, path: &Path) -> CoreResult<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for record in dataset.iter_live() {
        serde_json::to_writer(&mut writer, &record.fields)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;

    log::info!("Saved {written} records to {}", path.display());

    Ok(written)
}
