//! Run logs: truth, measurements and estimates of a scenario run, saved as
//! JSON for offline analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A full recorded run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub scenario_name: String,
    pub seed: u64,
    pub sim_dt: f64,
    pub duration: f64,
    /// One frame per measurement time, in chronological order
    pub frames: Vec<Frame>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub time: f64,
    pub targets: Vec<TargetRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: u64,
    /// True state `[x, vx, ax, y, vy, ay]`
    pub truth: [f64; 6],
    /// Measured position
    pub measured: [f64; 2],
    /// Combined estimate, canonical order
    pub estimate: Vec<f64>,
    pub mode_probabilities: Vec<f64>,
    pub dominant_mode: String,
}

/// Per-target summary of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub id: u64,
    /// Position RMSE of the combined estimate (m)
    pub position_rmse: f64,
    /// Position RMSE of the raw measurements (m)
    pub measurement_rmse: f64,
    /// Number of times the dominant mode changed
    pub mode_switches: usize,
    pub final_mode: String,
}

impl RunLog {
    /// Recompute per-target statistics from the recorded frames, ordered by id.
    pub fn statistics(&self) -> Vec<TargetStats> {
        #[derive(Default)]
        struct Acc {
            n: usize,
            est_sq: f64,
            meas_sq: f64,
            switches: usize,
            mode: Option<String>,
        }

        let mut acc: BTreeMap<u64, Acc> = BTreeMap::new();
        for frame in &self.frames {
            for rec in &frame.targets {
                let a = acc.entry(rec.id).or_default();
                let (tx, ty) = (rec.truth[0], rec.truth[3]);
                let (ex, ey) = (
                    rec.estimate.first().copied().unwrap_or(f64::NAN),
                    rec.estimate.get(3).copied().unwrap_or(f64::NAN),
                );
                a.n += 1;
                a.est_sq += (ex - tx).powi(2) + (ey - ty).powi(2);
                a.meas_sq += (rec.measured[0] - tx).powi(2) + (rec.measured[1] - ty).powi(2);
                if a.mode.as_deref().is_some_and(|m| m != rec.dominant_mode) {
                    a.switches += 1;
                }
                a.mode = Some(rec.dominant_mode.clone());
            }
        }

        acc.into_iter()
            .map(|(id, a)| {
                let n = a.n.max(1) as f64;
                TargetStats {
                    id,
                    position_rmse: (a.est_sq / n).sqrt(),
                    measurement_rmse: (a.meas_sq / n).sqrt(),
                    mode_switches: a.switches,
                    final_mode: a.mode.unwrap_or_default(),
                }
            })
            .collect()
    }
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
    Ok(log)
}
