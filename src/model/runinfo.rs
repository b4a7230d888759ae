//! Events + confounds tables -> run info and motion parameter file

use super::table::Table;
use crate::error::FlowError;
use crate::helpers::{format_g, round_to};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Rigid-body realignment columns, in FSL parameter order
pub const MOTION_COLUMNS: [&str; 6] = ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];

/// Per-run information consumed by model specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub scans: PathBuf,
    pub conditions: Vec<String>,
    pub onsets: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
    pub amplitudes: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regressor_names: Option<Vec<String>>,
    /// One row per regressor, one value per timepoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regressors: Option<Vec<Vec<f64>>>,
}

/// Which regressor columns were asked for and which were actually used
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressorSelection {
    pub requested: Vec<String>,
    pub used: Vec<String>,
    pub dropped: Vec<String>,
}

impl RegressorSelection {
    pub fn is_partial(&self) -> bool {
        !self.dropped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunInfoOptions {
    /// `None` selects every confound column that is not a motion column
    pub regressors_names: Option<Vec<String>>,
    pub motion_columns: Vec<String>,
    pub decimals: u32,
    pub amplitude: f64,
    /// Where `motion.par` is written
    pub out_dir: PathBuf,
}

impl Default for RunInfoOptions {
    fn default() -> Self {
        Self {
            regressors_names: None,
            motion_columns: MOTION_COLUMNS.iter().map(|s| s.to_string()).collect(),
            decimals: 3,
            amplitude: 1.0,
            out_dir: PathBuf::from("."),
        }
    }
}

/// Parse the events and confounds tables of one run.
///
/// Writes the motion parameters to `<out_dir>/motion.par` and returns the run info,
/// the path of the motion file, and the regressor selection actually applied.
pub fn bids_to_runinfo(
    in_file: &Path,
    events_file: &Path,
    regressors_file: &Path,
    options: &RunInfoOptions,
) -> Result<(RunInfo, PathBuf, RegressorSelection), FlowError> {
    let events = Table::from_file(events_file)?;
    let confounds = Table::from_file(regressors_file)?;

    let out_motion = options.out_dir.join("motion.par");
    write_motion_file(&confounds, &options.motion_columns, &out_motion)?;

    let requested = match &options.regressors_names {
        Some(names) => names.clone(),
        None => default_regressor_names(confounds.columns(), &options.motion_columns),
    };

    let trial_types = events.text_column("trial_type")?;
    let onset = events.numeric_column("onset")?;
    let duration = events.numeric_column("duration")?;
    let amplitude_col = ["amplitude", "amplitudes"]
        .into_iter()
        .find(|c| events.has_column(c));
    let amplitudes = match amplitude_col {
        Some(col) => Some(events.numeric_column(col)?),
        None => None,
    };

    let conditions = first_appearance(&trial_types);
    let mut runinfo = RunInfo {
        scans: in_file.to_path_buf(),
        conditions: conditions.clone(),
        onsets: Vec::with_capacity(conditions.len()),
        durations: Vec::with_capacity(conditions.len()),
        amplitudes: Vec::with_capacity(conditions.len()),
        regressor_names: None,
        regressors: None,
    };

    for condition in &conditions {
        let rows: Vec<usize> = trial_types
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == condition.as_str())
            .map(|(i, _)| i)
            .collect();

        runinfo
            .onsets
            .push(rows.iter().map(|&i| round_to(onset[i], options.decimals)).collect());
        runinfo
            .durations
            .push(rows.iter().map(|&i| round_to(duration[i], options.decimals)).collect());
        runinfo.amplitudes.push(match &amplitudes {
            Some(values) => rows
                .iter()
                .map(|&i| round_to(values[i], options.decimals))
                .collect(),
            None => vec![options.amplitude; rows.len()],
        });
    }

    let selection = select_regressors(&requested, confounds.columns());
    if selection.is_partial() {
        log::warn!(
            "{}: regressor columns not found and skipped: {}",
            regressors_file.display(),
            selection.dropped.join(", ")
        );
    }

    if !requested.is_empty() {
        let mut values = Vec::with_capacity(selection.used.len());
        for name in &selection.used {
            let column = confounds.numeric_column(name)?;
            values.push(
                column
                    .into_iter()
                    .map(|v| if v.is_nan() { 0.0 } else { v })
                    .collect(),
            );
        }
        runinfo.regressor_names = Some(selection.used.clone());
        runinfo.regressors = Some(values);
    }

    Ok((runinfo, out_motion, selection))
}

/// Confound columns that are not motion columns, sorted
fn default_regressor_names(columns: &[String], motion_columns: &[String]) -> Vec<String> {
    let motion: BTreeSet<&str> = motion_columns.iter().map(String::as_str).collect();
    let names: BTreeSet<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| !motion.contains(c))
        .collect();
    names.into_iter().map(str::to_string).collect()
}

fn select_regressors(requested: &[String], available: &[String]) -> RegressorSelection {
    let (used, dropped): (Vec<String>, Vec<String>) = requested
        .iter()
        .cloned()
        .partition(|name| available.contains(name));
    RegressorSelection {
        requested: requested.to_vec(),
        used,
        dropped,
    }
}

fn first_appearance(values: &[&str]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter(|v| seen.insert(**v))
        .map(|v| v.to_string())
        .collect()
}

fn write_motion_file(
    confounds: &Table,
    motion_columns: &[String],
    out: &Path,
) -> Result<(), FlowError> {
    let columns = motion_columns
        .iter()
        .map(|c| confounds.numeric_column(c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut content = String::new();
    for row in 0..confounds.len() {
        let line: Vec<String> = columns.iter().map(|c| format_g(c[row])).collect();
        let _ = writeln!(content, "{}", line.join(" "));
    }

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFOUNDS: &str = "\
trans_x trans_y trans_z rot_x rot_y rot_z framewise_displacement dvars a_comp_cor_00
0.1 0 0 0 0 0.001 n/a n/a 0.5
0.12345678 0 0 0 0 0.002 0.2 1.1 0.4
";

    fn write_inputs(dir: &TempDir, events: &str) -> (PathBuf, PathBuf) {
        let ev = dir.path().join("events.tsv");
        let conf = dir.path().join("confounds.tsv");
        fs::write(&ev, events).unwrap();
        fs::write(&conf, CONFOUNDS).unwrap();
        (ev, conf)
    }

    fn options(dir: &TempDir) -> RunInfoOptions {
        RunInfoOptions {
            out_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_regressors_are_sorted_non_motion_columns() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(&dir, "onset duration trial_type\n0 1 A\n");
        let (info, _, selection) =
            bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &options(&dir)).unwrap();
        let expected = vec!["a_comp_cor_00", "dvars", "framewise_displacement"];
        assert_eq!(info.regressor_names.unwrap(), expected);
        assert!(!selection.is_partial());
        let regressors = info.regressors.unwrap();
        assert_eq!(regressors.len(), 3);
        // n/a in dvars becomes zero
        assert_eq!(regressors[1], vec![0.0, 1.1]);
    }

    #[test]
    fn test_duplicate_trial_types_are_rounded() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(
            &dir,
            "onset duration trial_type\n1.23456 2.0004 go\n5.5 2 stop\n10.98765 2.0 go\n",
        );
        let (info, _, _) =
            bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &options(&dir)).unwrap();
        assert_eq!(info.conditions, vec!["go", "stop"]);
        assert_eq!(info.onsets[0], vec![1.235, 10.988]);
        assert_eq!(info.durations[0], vec![2.0, 2.0]);
        assert_eq!(info.onsets[1], vec![5.5]);
    }

    #[test]
    fn test_default_amplitude_fill() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(&dir, "onset duration trial_type\n0 1 A\n4 1 A\n8 1 B\n");
        let opts = RunInfoOptions {
            amplitude: 2.5,
            ..options(&dir)
        };
        let (info, _, _) = bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &opts).unwrap();
        for (onsets, amps) in info.onsets.iter().zip(&info.amplitudes) {
            assert_eq!(onsets.len(), amps.len());
            assert!(amps.iter().all(|a| *a == 2.5));
        }
    }

    #[test]
    fn test_amplitude_column_used() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(
            &dir,
            "onset duration trial_type amplitude\n0 1 A 0.5\n4 1 A -0.25\n",
        );
        let (info, _, _) =
            bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &options(&dir)).unwrap();
        assert_eq!(info.amplitudes, vec![vec![0.5, -0.25]]);
    }

    #[test]
    fn test_missing_regressor_falls_back_to_intersection() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(&dir, "onset duration trial_type\n0 1 A\n");
        let opts = RunInfoOptions {
            regressors_names: Some(vec![
                "dvars".to_string(),
                "cosine00".to_string(),
                "framewise_displacement".to_string(),
            ]),
            ..options(&dir)
        };
        let (info, _, selection) =
            bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &opts).unwrap();
        assert_eq!(
            info.regressor_names.unwrap(),
            vec!["dvars", "framewise_displacement"]
        );
        assert_eq!(selection.dropped, vec!["cosine00"]);
        assert_eq!(info.regressors.unwrap().len(), 2);
    }

    #[test]
    fn test_empty_request_means_no_regressors() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(&dir, "onset duration trial_type\n0 1 A\n");
        let opts = RunInfoOptions {
            regressors_names: Some(vec![]),
            ..options(&dir)
        };
        let (info, _, _) = bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &opts).unwrap();
        assert!(info.regressor_names.is_none());
        assert!(info.regressors.is_none());
    }

    #[test]
    fn test_motion_file_format() {
        let dir = TempDir::new().unwrap();
        let (ev, conf) = write_inputs(&dir, "onset duration trial_type\n0 1 A\n");
        let (_, motion, _) =
            bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &options(&dir)).unwrap();
        let content = fs::read_to_string(motion).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["0.1 0 0 0 0 0.001", "0.123457 0 0 0 0 0.002"]);
    }

    #[test]
    fn test_missing_motion_column_is_error() {
        let dir = TempDir::new().unwrap();
        let ev = dir.path().join("events.tsv");
        let conf = dir.path().join("confounds.tsv");
        fs::write(&ev, "onset duration trial_type\n0 1 A\n").unwrap();
        fs::write(&conf, "trans_x dvars\n0 1\n").unwrap();
        let err = bids_to_runinfo(Path::new("bold.nii.gz"), &ev, &conf, &options(&dir)).unwrap_err();
        assert!(err.to_string().contains("missing column 'trans_y'"));
    }
}
