//! Persisting batch results.
use std::path::{Path, PathBuf};

use anyhow::Context;
use batchbench_common::ContractAddress;
use batchbench_submitter::BatchSummary;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

/// The parameters a batch ran with, next to its summary.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub timestamp: String,
    pub contract_address: ContractAddress,
    pub rpc_urls: Vec<String>,
    pub num_accounts: usize,
    pub bundle_size: usize,
    pub read_ratio: f64,
    pub concurrency: usize,
    pub nonce_strategy: String,
    pub summary: &'a BatchSummary,
}

/// `20250101_120000` style timestamp, used in file names.
pub fn timestamp(at: OffsetDateTime) -> anyhow::Result<String> {
    at.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))
    .context("Formatting timestamp")
}

/// Writes `batch_<id>_<timestamp>.json` into `dir`, creating it if needed.
pub fn write(dir: &Path, report: &Report<'_>) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Creating results directory {}", dir.display()))?;

    let path = dir.join(format!(
        "batch_{}_{}.json",
        report.summary.batch_id, report.timestamp
    ));
    let json = serde_json::to_vec_pretty(report).context("Serializing report")?;
    std::fs::write(&path, json).with_context(|| format!("Writing {}", path.display()))?;

    Ok(path)
}
