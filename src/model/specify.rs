//! Model specification: run info + realignment parameters -> session info

use super::runinfo::RunInfo;
use super::table::Table;
use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub onset: Vec<f64>,
    pub duration: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regressor {
    pub name: String,
    pub val: Vec<f64>,
}

/// One functional run, ready for design generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub scans: PathBuf,
    /// High-pass filter cutoff in seconds
    pub hpf: f64,
    pub cond: Vec<Condition>,
    pub regress: Vec<Regressor>,
}

impl SessionInfo {
    /// Number of timepoints, taken from the regressor length
    pub fn npts(&self) -> Option<usize> {
        self.regress.first().map(|r| r.val.len())
    }
}

/// Build the session info of one run.
///
/// Onsets and durations are in seconds. The six FSL realignment parameters from
/// `realignment_parameters` are appended after the run's own regressors as
/// `Realign1`..`Realign6`.
pub fn specify_model(
    info: &RunInfo,
    functional_run: &Path,
    realignment_parameters: Option<&Path>,
    high_pass_filter_cutoff: f64,
) -> Result<SessionInfo, FlowError> {
    let cond = info
        .conditions
        .iter()
        .enumerate()
        .map(|(i, name)| Condition {
            name: name.clone(),
            onset: info.onsets.get(i).cloned().unwrap_or_default(),
            duration: info.durations.get(i).cloned().unwrap_or_default(),
            amplitudes: info.amplitudes.get(i).cloned().unwrap_or_default(),
        })
        .collect();

    let mut regress: Vec<Regressor> = match (&info.regressor_names, &info.regressors) {
        (Some(names), Some(values)) => names
            .iter()
            .zip(values)
            .map(|(name, val)| Regressor {
                name: name.clone(),
                val: val.clone(),
            })
            .collect(),
        _ => Vec::new(),
    };

    if let Some(path) = realignment_parameters {
        regress.extend(read_realignment(path)?);
    }

    Ok(SessionInfo {
        scans: functional_run.to_path_buf(),
        hpf: high_pass_filter_cutoff,
        cond,
        regress,
    })
}

/// Read a headerless `.par` file into one regressor per column
fn read_realignment(path: &Path) -> Result<Vec<Regressor>, FlowError> {
    let content = std::fs::read_to_string(path)?;
    let ncols = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.split_whitespace().count())
        .unwrap_or(0);
    let header: Vec<String> = (1..=ncols).map(|i| format!("Realign{}", i)).collect();
    let table = Table::parse(
        &format!("{}\n{}", header.join(" "), content),
        &path.display().to_string(),
    )?;

    header
        .iter()
        .map(|name| {
            Ok(Regressor {
                name: name.clone(),
                val: table.numeric_column(name)?,
            })
        })
        .collect()
}
