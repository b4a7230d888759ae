//! Group-level tools: flameo, smoothest, cluster

use crate::bids::split_extension;
use crate::core::runner::CommandLine;
use crate::core::Outputs;
use crate::error::FlowError;
use crate::interfaces::{path_value, paths_value, Interface, NodeContext};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Mixed-effects group fit.
///
/// Inputs: `cope_file`, `var_cope_file`, `mask_file`, `design_file`, `t_con_file`,
/// `cov_split_file`.
#[derive(Debug, Clone)]
pub struct Flameo {
    /// `ols`, `fe`, `flame1` or `flame12`
    pub run_mode: String,
    pub log_dir: String,
}

impl Flameo {
    pub fn ols() -> Self {
        Self {
            run_mode: "ols".to_string(),
            log_dir: "stats".to_string(),
        }
    }
}

/// `/NumContrasts` of a VEST contrast file
fn num_contrasts(con_file: &Path) -> Result<usize, FlowError> {
    let content = fs::read_to_string(con_file)?;
    content
        .lines()
        .find_map(|l| l.strip_prefix("/NumContrasts"))
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| FlowError::Table {
            path: con_file.display().to_string(),
            detail: "no /NumContrasts header".to_string(),
        })
}

impl Interface for Flameo {
    fn kind(&self) -> &'static str {
        "flameo"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let t_con = ctx.path("t_con_file")?;
        let ncon = num_contrasts(&t_con)?;
        fs::create_dir_all(ctx.work_dir)?;

        ctx.run(
            CommandLine::new("flameo")
                .opt("copefile", ctx.path("cope_file")?.display())
                .opt("varcopefile", ctx.path("var_cope_file")?.display())
                .opt("maskfile", ctx.path("mask_file")?.display())
                .opt("designfile", ctx.path("design_file")?.display())
                .opt("tcontrastsfile", t_con.display())
                .opt("covsplitfile", ctx.path("cov_split_file")?.display())
                .opt("runmode", &self.run_mode)
                .opt("ld", &self.log_dir)
                .cwd(ctx.work_dir),
        )?;

        let stats = ctx.work_dir.join(&self.log_dir);
        let per_contrast = |prefix: &str| -> Vec<PathBuf> {
            (1..=ncon)
                .map(|i| stats.join(format!("{}{}.nii.gz", prefix, i)))
                .collect()
        };

        let mut outputs = Outputs::new();
        for (field, prefix) in [
            ("zstats", "zstat"),
            ("tstats", "tstat"),
            ("copes", "cope"),
            ("var_copes", "varcope"),
        ] {
            outputs.insert(field.to_string(), paths_value(&per_contrast(prefix)));
        }
        outputs.insert("res4d".to_string(), path_value(&stats.join("res4d.nii.gz")));
        Ok(outputs)
    }
}

/// Smoothness of a residual image.
///
/// Inputs: `mask_file`, `dof`, `residual_fit_file`. Outputs `dlh`, `volume`, `resels`.
#[derive(Debug, Clone, Default)]
pub struct SmoothEstimate;

/// Parse `DLH`, `VOLUME` and `RESELS` lines of smoothest output
pub fn parse_smoothest(stdout: &str) -> Result<(f64, i64, f64), FlowError> {
    let re = Regex::new(r"(?m)^\s*(DLH|VOLUME|RESELS)\s+([-+0-9.eE]+)").map_err(|e| {
        FlowError::ToolOutput {
            program: "smoothest".to_string(),
            detail: e.to_string(),
        }
    })?;
    let (mut dlh, mut volume, mut resels) = (None, None, None);
    for caps in re.captures_iter(stdout) {
        let value: Option<f64> = caps[2].parse().ok();
        match &caps[1] {
            "DLH" => dlh = value,
            "VOLUME" => volume = value.map(|v| v as i64),
            _ => resels = value,
        }
    }
    match (dlh, volume, resels) {
        (Some(d), Some(v), Some(r)) => Ok((d, v, r)),
        _ => Err(FlowError::ToolOutput {
            program: "smoothest".to_string(),
            detail: format!("missing DLH/VOLUME/RESELS in {:?}", stdout.trim()),
        }),
    }
}

impl Interface for SmoothEstimate {
    fn kind(&self) -> &'static str {
        "smoothest"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let output = ctx.run(
            CommandLine::new("smoothest")
                .opt("dof", ctx.i64("dof")?)
                .opt("mask", ctx.path("mask_file")?.display())
                .opt("res", ctx.path("residual_fit_file")?.display()),
        )?;
        let (dlh, volume, resels) = parse_smoothest(&output.stdout)?;
        log::info!(
            "[{}] DLH {} VOLUME {} RESELS {}",
            ctx.name,
            dlh,
            volume,
            resels
        );

        Ok(Outputs::from([
            ("dlh".to_string(), Value::from(dlh)),
            ("volume".to_string(), Value::from(volume)),
            ("resels".to_string(), Value::from(resels)),
        ]))
    }
}

/// Cluster-extent thresholding.
///
/// Inputs: `in_file`, `cope_file`, `volume`, `dlh`. Writes the thresholded map, the
/// cluster index map, the local maxima table and the cluster table printed on stdout.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub threshold: f64,
    pub pthreshold: f64,
    pub connectivity: u32,
}

impl Interface for Cluster {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_file = ctx.path("in_file")?;
        let name = in_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("zstat");
        let (stem, _) = split_extension(name);
        let threshold_file = ctx.work_dir.join(format!("{}_threshold.nii.gz", stem));
        let index_file = ctx.work_dir.join(format!("{}_index.nii.gz", stem));
        let localmax_txt_file = ctx.work_dir.join(format!("{}_localmax.txt", stem));
        let table_file = ctx.work_dir.join(format!("{}_clusters.txt", stem));
        fs::create_dir_all(ctx.work_dir)?;

        let mut cmd = CommandLine::new("cluster")
            .opt("in", in_file.display())
            .opt("thresh", self.threshold)
            .opt("pthresh", self.pthreshold)
            .opt("connectivity", self.connectivity);
        if ctx.has_input("cope_file") {
            cmd = cmd.opt("cope", ctx.path("cope_file")?.display());
        }
        let output = ctx.run(
            cmd.opt("volume", ctx.i64("volume")?)
                .opt("dlh", ctx.f64("dlh")?)
                .opt("othresh", threshold_file.display())
                .opt("oindex", index_file.display())
                .opt("olmax", localmax_txt_file.display()),
        )?;
        fs::write(&table_file, &output.stdout)?;

        Ok(Outputs::from([
            ("threshold_file".to_string(), path_value(&threshold_file)),
            ("index_file".to_string(), path_value(&index_file)),
            ("localmax_txt_file".to_string(), path_value(&localmax_txt_file)),
            ("cluster_table".to_string(), path_value(&table_file)),
        ]))
    }
}
