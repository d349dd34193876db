//! Run logs: serialize/deserialize generated runs for offline re-filtering.

use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Ground truth and measurements of one generated run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunLog {
    pub scenario_name: String,
    pub seed: u64,
    pub dt: f64,
    pub meas_std: [f64; 2],
    /// True states `[x, vx, ax, y, vy, ay]`, one per sample
    pub truth: Vec<[f64; 6]>,
    /// Position measurements `[x, y]`, aligned with `truth`
    pub measurements: Vec<[f64; 2]>,
}

/// Save a run log to a JSON file.
pub fn save_log(log: &RunLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a run log from a JSON file.
pub fn load_log(path: &Path) -> anyhow::Result<RunLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: RunLog = serde_json::from_reader(reader)?;
    anyhow::ensure!(
        log.truth.len() == log.measurements.len(),
        "run log has {} truth samples but {} measurements",
        log.truth.len(),
        log.measurements.len()
    );
    Ok(log)
}
