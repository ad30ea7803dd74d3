//! Dataset files.

use anyhow::{bail, Context, Result};
use promptc_common::Example;
use std::path::Path;

/// Share of rows used for training; the rest validates.
pub const TRAIN_SPLIT: f64 = 0.8;

/// Read rows from a JSON array of objects or from JSON lines.
pub fn load_rows(path: &Path) -> Result<Vec<Example>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;

    if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid row on line {} of {}", n + 1, path.display()))
            })
            .collect()
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Expected a JSON array of rows in {}", path.display()))
    }
}

/// First 80% of rows train, the rest validate.
pub fn split_dataset(rows: Vec<Example>) -> Result<(Vec<Example>, Vec<Example>)> {
    if rows.len() < 2 {
        bail!(
            "At least 2 rows are needed to split into training and validation sets, got {}",
            rows.len()
        );
    }
    let split = ((rows.len() as f64) * TRAIN_SPLIT) as usize;
    let mut train = rows;
    let validation = train.split_off(split);
    Ok((train, validation))
}
