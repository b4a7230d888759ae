//! In-process design nodes: run info, model specification, first- and second-level designs

use super::{path_value, paths_value, Interface, NodeContext};
use crate::core::Outputs;
use crate::error::FlowError;
use crate::model::{
    bids_to_runinfo, specify_model, write_l2_model, Contrast, Level1Design, RunInfo,
    RunInfoOptions, SessionInfo, MOTION_COLUMNS,
};
use serde_json::Value;

/// Events + confounds -> run info and `motion.par`.
///
/// Inputs: `in_file`, `events_file`, `regressors_file`, optional `regressors_names`.
#[derive(Debug, Clone)]
pub struct RunInfoNode {
    pub motion_columns: Vec<String>,
    pub decimals: u32,
    pub amplitude: f64,
}

impl Default for RunInfoNode {
    fn default() -> Self {
        Self {
            motion_columns: MOTION_COLUMNS.iter().map(|s| s.to_string()).collect(),
            decimals: 3,
            amplitude: 1.0,
        }
    }
}

impl Interface for RunInfoNode {
    fn kind(&self) -> &'static str {
        "runinfo"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let regressors_names = if ctx.has_input("regressors_names") {
            Some(ctx.typed::<Vec<String>>("regressors_names")?)
        } else {
            None
        };
        let options = RunInfoOptions {
            regressors_names,
            motion_columns: self.motion_columns.clone(),
            decimals: self.decimals,
            amplitude: self.amplitude,
            out_dir: ctx.work_dir.to_path_buf(),
        };

        let (info, realign_file, selection) = bids_to_runinfo(
            &ctx.path("in_file")?,
            &ctx.path("events_file")?,
            &ctx.path("regressors_file")?,
            &options,
        )?;
        log::info!(
            "[{}] {} conditions, {} regressors",
            ctx.name,
            info.conditions.len(),
            selection.used.len()
        );

        let mut outputs = Outputs::new();
        outputs.insert("info".to_string(), serde_json::to_value(vec![info])?);
        outputs.insert("realign_file".to_string(), path_value(&realign_file));
        outputs.insert(
            "dropped_regressors".to_string(),
            serde_json::to_value(&selection.dropped)?,
        );
        Ok(outputs)
    }
}

/// Run info -> session info for each functional run
#[derive(Debug, Clone)]
pub struct SpecifyModel {
    /// Seconds
    pub high_pass_filter_cutoff: f64,
}

impl Interface for SpecifyModel {
    fn kind(&self) -> &'static str {
        "specify_model"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let infos: Vec<RunInfo> = ctx.typed("subject_info")?;
        let runs = ctx.paths("functional_runs")?;
        let realign = if ctx.has_input("realignment_parameters") {
            ctx.paths("realignment_parameters")?
        } else {
            Vec::new()
        };
        if runs.len() != infos.len() {
            return Err(FlowError::InputType {
                node: ctx.name.to_string(),
                field: "functional_runs".to_string(),
                expected: "one functional run per run info",
            });
        }
        let tr = ctx.f64("time_repetition")?;
        if tr <= 0.0 {
            return Err(FlowError::InputType {
                node: ctx.name.to_string(),
                field: "time_repetition".to_string(),
                expected: "positive number of seconds",
            });
        }

        let sessions = infos
            .iter()
            .zip(&runs)
            .enumerate()
            .map(|(i, (info, run))| {
                specify_model(info, run, realign.get(i).map(|p| p.as_path()), self.high_pass_filter_cutoff)
            })
            .collect::<Result<Vec<SessionInfo>, _>>()?;

        let mut outputs = Outputs::new();
        outputs.insert("session_info".to_string(), serde_json::to_value(sessions)?);
        Ok(outputs)
    }
}

/// Session info -> `.fsf` setup and EV files
#[derive(Debug, Clone)]
pub struct Level1DesignNode {
    pub derivs: bool,
    pub model_serial_correlations: bool,
    pub contrasts: Vec<Contrast>,
}

impl Interface for Level1DesignNode {
    fn kind(&self) -> &'static str {
        "level1_design"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let sessions: Vec<SessionInfo> = ctx.typed("session_info")?;
        for session in &sessions {
            let names: Vec<&str> = session.cond.iter().map(|c| c.name.as_str()).collect();
            for contrast in &self.contrasts {
                contrast.validate(&names)?;
            }
        }
        let design = Level1Design {
            interscan_interval: ctx.f64("interscan_interval")?,
            derivs: self.derivs,
            model_serial_correlations: self.model_serial_correlations,
            contrasts: self.contrasts.clone(),
        };
        let written = design.write(&sessions, ctx.work_dir)?;

        let ev_files = match written.ev_files.as_slice() {
            [one] => paths_value(one),
            many => Value::Array(many.iter().map(|evs| paths_value(evs)).collect()),
        };
        let mut outputs = Outputs::new();
        outputs.insert("fsf_files".to_string(), paths_value(&written.fsf_files));
        outputs.insert("ev_files".to_string(), ev_files);
        Ok(outputs)
    }
}

/// Number of inputs -> one-sample group design files
#[derive(Debug, Clone, Default)]
pub struct L2Model;

impl Interface for L2Model {
    fn kind(&self) -> &'static str {
        "l2_model"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let num_copes = ctx.i64("num_copes")?;
        let files = write_l2_model(num_copes.max(0) as usize, ctx.work_dir)?;

        let mut outputs = Outputs::new();
        outputs.insert("design_mat".to_string(), path_value(&files.design_mat));
        outputs.insert("design_con".to_string(), path_value(&files.design_con));
        outputs.insert("design_grp".to_string(), path_value(&files.design_grp));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::ProcessRunner;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_runinfo_to_design() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events.tsv");
        let confounds = dir.path().join("confounds.tsv");
        fs::write(&events, "onset duration trial_type\n0 2 A\n6 2 B\n12 2 A\n").unwrap();
        fs::write(
            &confounds,
            "trans_x trans_y trans_z rot_x rot_y rot_z dvars\n0 0 0 0 0 0 n/a\n0 0 0 0 0 0 1\n0 0 0 0 0 0 2\n",
        )
        .unwrap();

        let mut inputs = Outputs::new();
        inputs.insert("in_file".into(), json!("smooth.nii.gz"));
        inputs.insert("events_file".into(), path_value(&events));
        inputs.insert("regressors_file".into(), path_value(&confounds));
        inputs.insert("regressors_names".into(), json!(["dvars", "cosine00"]));
        let ctx = NodeContext::new("runinfo", &inputs, dir.path(), &ProcessRunner);
        let runinfo = RunInfoNode::default().run(&ctx).unwrap();
        assert_eq!(runinfo["dropped_regressors"], json!(["cosine00"]));

        let mut inputs = Outputs::new();
        inputs.insert("subject_info".into(), runinfo["info"].clone());
        inputs.insert("realignment_parameters".into(), runinfo["realign_file"].clone());
        inputs.insert("functional_runs".into(), json!("smooth.nii.gz"));
        inputs.insert("time_repetition".into(), json!(2.0));
        let ctx = NodeContext::new("l1_spec", &inputs, dir.path(), &ProcessRunner);
        let spec = SpecifyModel { high_pass_filter_cutoff: 100.0 }.run(&ctx).unwrap();
        let sessions: Vec<SessionInfo> = serde_json::from_value(spec["session_info"].clone()).unwrap();
        assert_eq!(sessions[0].regress.len(), 7);

        let mut inputs = Outputs::new();
        inputs.insert("session_info".into(), spec["session_info"].clone());
        inputs.insert("interscan_interval".into(), json!(2.0));
        let l1_dir = dir.path().join("l1_model");
        let ctx = NodeContext::new("l1_model", &inputs, &l1_dir, &ProcessRunner);
        let node = Level1DesignNode {
            derivs: true,
            model_serial_correlations: true,
            contrasts: vec![],
        };
        let out = node.run(&ctx).unwrap();
        assert!(out["fsf_files"].as_str().unwrap().ends_with("run0.fsf"));
        // A, B, dvars and six realignment regressors
        assert_eq!(out["ev_files"].as_array().unwrap().len(), 9);
    }

    #[test]
    fn test_level1_design_rejects_unweighted_contrast() {
        let dir = TempDir::new().unwrap();
        let session = SessionInfo {
            scans: "smooth.nii.gz".into(),
            hpf: 100.0,
            cond: vec![],
            regress: vec![],
        };
        let mut inputs = Outputs::new();
        inputs.insert("session_info".into(), json!([session]));
        inputs.insert("interscan_interval".into(), json!(2.0));
        let ctx = NodeContext::new("l1_model", &inputs, dir.path(), &ProcessRunner);
        let node = Level1DesignNode {
            derivs: true,
            model_serial_correlations: true,
            contrasts: vec![Contrast::t("A>B", &["A", "B"], &[1.0])],
        };
        assert!(matches!(node.run(&ctx), Err(FlowError::Contrast { .. })));
        assert!(!dir.path().join("run0.fsf").exists());
    }

    #[test]
    fn test_l2_model_outputs() {
        let dir = TempDir::new().unwrap();
        let mut inputs = Outputs::new();
        inputs.insert("num_copes".into(), json!(4));
        let ctx = NodeContext::new("l2_model", &inputs, dir.path(), &ProcessRunner);
        let out = L2Model.run(&ctx).unwrap();
        assert!(Path::new(out["design_mat"].as_str().unwrap()).exists());
        assert!(out["design_grp"].as_str().unwrap().ends_with("design.grp"));
    }
}
