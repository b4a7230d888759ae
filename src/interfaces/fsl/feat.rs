//! feat_model / feat

use crate::bids::split_extension;
use crate::core::runner::CommandLine;
use crate::core::Outputs;
use crate::error::FlowError;
use crate::interfaces::{path_value, Interface, NodeContext};
use std::fs;

/// Builds the design matrix files of an `.fsf` setup
#[derive(Debug, Clone, Default)]
pub struct FeatModel;

impl Interface for FeatModel {
    fn kind(&self) -> &'static str {
        "feat_model"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let fsf = ctx.path("fsf_file")?;
        let ev_files = ctx.paths("ev_files")?;
        if let Some(missing) = ev_files.iter().find(|f| !f.exists()) {
            return Err(FlowError::NoMatch {
                pattern: missing.display().to_string(),
                base: ctx.name.to_string(),
            });
        }

        let name = fsf
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("design.fsf");
        let (stem, _) = split_extension(name);
        fs::create_dir_all(ctx.work_dir)?;
        fs::copy(&fsf, ctx.work_dir.join(format!("{}.fsf", stem)))?;

        ctx.run(CommandLine::new("feat_model").arg(stem).cwd(ctx.work_dir))?;

        let out = |ext: &str| path_value(&ctx.work_dir.join(format!("{}{}", stem, ext)));
        Ok(Outputs::from([
            ("design_file".to_string(), out(".mat")),
            ("con_file".to_string(), out(".con")),
            ("design_image".to_string(), out(".png")),
            ("design_cov".to_string(), out("_cov.png")),
        ]))
    }
}

/// Runs a FEAT analysis from an `.fsf` setup
#[derive(Debug, Clone, Default)]
pub struct Feat;

impl Interface for Feat {
    fn kind(&self) -> &'static str {
        "feat"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let fsf = ctx.path("fsf_file")?;
        fs::create_dir_all(ctx.work_dir)?;
        ctx.run(CommandLine::new("feat").path(&fsf).cwd(ctx.work_dir))?;

        let mut feat_dirs: Vec<_> = fs::read_dir(ctx.work_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.extension().is_some_and(|x| x == "feat"))
            .collect();
        feat_dirs.sort();
        let feat_dir = feat_dirs.into_iter().next().ok_or_else(|| FlowError::NoMatch {
            pattern: "*.feat".to_string(),
            base: ctx.work_dir.display().to_string(),
        })?;

        Ok(Outputs::from([("feat_dir".to_string(), path_value(&feat_dir))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::fsl::ScriptedRunner;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_feat_finds_output_dir() {
        let dir = TempDir::new().unwrap();
        let inputs = Outputs::from([("fsf_file".to_string(), json!("/d/run0.fsf"))]);
        let runner = ScriptedRunner::new();
        let ctx = NodeContext::new("feat_fit", &inputs, dir.path(), &runner);
        let out = Feat.run(&ctx).unwrap();
        assert_eq!(out["feat_dir"], path_value(&dir.path().join("run0.feat")));
    }

    #[test]
    fn test_feat_tool_failure() {
        let dir = TempDir::new().unwrap();
        let inputs = Outputs::from([("fsf_file".to_string(), json!("/d/run0.fsf"))]);
        let runner = ScriptedRunner::new().failing("feat");
        let ctx = NodeContext::new("feat_fit", &inputs, dir.path(), &runner);
        assert!(matches!(
            Feat.run(&ctx),
            Err(FlowError::ToolFailed { code: 1, .. })
        ));
    }

    #[test]
    fn test_feat_model_runs_in_work_dir() {
        let dir = TempDir::new().unwrap();
        let fsf = dir.path().join("run0.fsf");
        let ev = dir.path().join("ev_A_0_1.txt");
        fs::write(&fsf, "set fmri(level) 1\n").unwrap();
        fs::write(&ev, "0 1 1\n").unwrap();

        let work = dir.path().join("feat_spec");
        let inputs = Outputs::from([
            ("fsf_file".to_string(), path_value(&fsf)),
            ("ev_files".to_string(), json!([ev.display().to_string()])),
        ]);
        let runner = ScriptedRunner::new();
        let ctx = NodeContext::new("feat_spec", &inputs, &work, &runner);
        let out = FeatModel.run(&ctx).unwrap();

        assert!(work.join("run0.fsf").exists());
        assert_eq!(runner.commands(), vec!["feat_model run0"]);
        assert_eq!(out["design_file"], path_value(&work.join("run0.mat")));
    }
}
