//! fslmaths / fslstats / fslmerge

use super::parse_number;
use crate::core::runner::CommandLine;
use crate::core::Outputs;
use crate::error::FlowError;
use crate::interfaces::{path_value, Interface, NodeContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// `fslmaths <in_file> <op_string> [<in_file2>] <out>`
#[derive(Debug, Clone)]
pub struct ImageMaths {
    pub op_string: String,
    pub suffix: String,
}

impl ImageMaths {
    pub fn new(op_string: &str, suffix: &str) -> Self {
        Self {
            op_string: op_string.to_string(),
            suffix: suffix.to_string(),
        }
    }
}

impl Interface for ImageMaths {
    fn kind(&self) -> &'static str {
        "fslmaths"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_file = ctx.path("in_file")?;
        let out_file = ctx.derived_image(&in_file, &self.suffix);

        let mut cmd = CommandLine::new("fslmaths").path(&in_file);
        for op in self.op_string.split_whitespace() {
            cmd = cmd.arg(op);
        }
        if ctx.has_input("in_file2") {
            cmd = cmd.path(&ctx.path("in_file2")?);
        }
        ctx.run(cmd.path(&out_file))?;

        Ok(Outputs::from([("out_file".to_string(), path_value(&out_file))]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Zero everything below the threshold
    Below,
    /// Zero everything above the threshold
    Above,
}

/// `fslmaths <in_file> -thr|-uthr <thresh> <out>`
#[derive(Debug, Clone)]
pub struct Threshold {
    pub direction: ThresholdDirection,
}

impl Interface for Threshold {
    fn kind(&self) -> &'static str {
        "threshold"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_file = ctx.path("in_file")?;
        let thresh = ctx.f64("thresh")?;
        let out_file = ctx.derived_image(&in_file, "_thresh");
        let flag = match self.direction {
            ThresholdDirection::Below => "-thr",
            ThresholdDirection::Above => "-uthr",
        };

        ctx.run(
            CommandLine::new("fslmaths")
                .path(&in_file)
                .arg(flag)
                .arg(thresh)
                .path(&out_file),
        )?;

        Ok(Outputs::from([("out_file".to_string(), path_value(&out_file))]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for MathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Sub => write!(f, "sub"),
            Self::Mul => write!(f, "mul"),
            Self::Div => write!(f, "div"),
        }
    }
}

/// `fslmaths <in_file> -<op> <operand> <out>`; operand is a constant or the `operand_file` input
#[derive(Debug, Clone)]
pub struct BinaryMaths {
    pub operation: MathOp,
    pub operand_value: Option<f64>,
}

impl BinaryMaths {
    pub fn with_file(operation: MathOp) -> Self {
        Self {
            operation,
            operand_value: None,
        }
    }

    pub fn with_value(operation: MathOp, value: f64) -> Self {
        Self {
            operation,
            operand_value: Some(value),
        }
    }
}

impl Interface for BinaryMaths {
    fn kind(&self) -> &'static str {
        "binary_maths"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_file = ctx.path("in_file")?;
        let out_file = ctx.derived_image(&in_file, "_maths");

        let cmd = CommandLine::new("fslmaths")
            .path(&in_file)
            .arg(format!("-{}", self.operation));
        let cmd = match self.operand_value {
            Some(v) => cmd.arg(v),
            None => cmd.path(&ctx.path("operand_file")?),
        };
        ctx.run(cmd.path(&out_file))?;

        Ok(Outputs::from([("out_file".to_string(), path_value(&out_file))]))
    }
}

/// `fslstats <in_file> [-k <mask_file>] <op_string>`, first number printed
#[derive(Debug, Clone)]
pub struct ImageStats {
    pub op_string: String,
}

impl Interface for ImageStats {
    fn kind(&self) -> &'static str {
        "fslstats"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let mut cmd = CommandLine::new("fslstats").path(&ctx.path("in_file")?);
        if ctx.has_input("mask_file") {
            cmd = cmd.arg("-k").path(&ctx.path("mask_file")?);
        }
        for op in self.op_string.split_whitespace() {
            cmd = cmd.arg(op);
        }
        let output = ctx.run(cmd)?;
        let stat = parse_number("fslstats", &output.stdout)?;

        Ok(Outputs::from([("out_stat".to_string(), Value::from(stat))]))
    }
}

/// `fslmerge -<dimension> <merged> <in_files...>`
#[derive(Debug, Clone)]
pub struct Merge {
    pub dimension: char,
}

impl Interface for Merge {
    fn kind(&self) -> &'static str {
        "fslmerge"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_files = ctx.paths("in_files")?;
        let first = in_files.first().ok_or_else(|| FlowError::MissingInput {
            node: ctx.name.to_string(),
            field: "in_files".to_string(),
        })?;
        let merged = ctx.derived_image(first, "_merged");

        let mut cmd = CommandLine::new("fslmerge")
            .arg(format!("-{}", self.dimension))
            .path(&merged);
        for f in &in_files {
            cmd = cmd.path(f);
        }
        ctx.run(cmd)?;

        Ok(Outputs::from([("merged_file".to_string(), path_value(&merged))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::{CommandOutput, CommandRunner};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records command lines and answers with fixed stdout
    struct Recorder {
        stdout: String,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(stdout: &str) -> Self {
            Self {
                stdout: stdout.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for Recorder {
        fn run(&self, cmd: &CommandLine) -> Result<CommandOutput, FlowError> {
            self.seen.lock().unwrap().push(cmd.to_string());
            Ok(CommandOutput {
                code: 0,
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    fn run_with(iface: &dyn Interface, inputs: Outputs, stdout: &str) -> (Outputs, Vec<String>) {
        let runner = Recorder::new(stdout);
        let ctx = NodeContext::new("n", &inputs, Path::new("/w"), &runner);
        let out = iface.run(&ctx).unwrap();
        let seen = runner.seen.lock().unwrap().clone();
        (out, seen)
    }

    #[test]
    fn test_threshold_directions() {
        let inputs = Outputs::from([
            ("in_file".to_string(), json!("/s/zstat1.nii.gz")),
            ("thresh".to_string(), json!(-4.5)),
        ]);
        let (out, seen) = run_with(
            &Threshold {
                direction: ThresholdDirection::Below,
            },
            inputs.clone(),
            "",
        );
        assert_eq!(seen, vec!["fslmaths /s/zstat1.nii.gz -thr -4.5 /w/zstat1_thresh.nii.gz"]);
        assert_eq!(out["out_file"], json!("/w/zstat1_thresh.nii.gz"));

        let (_, seen) = run_with(
            &Threshold {
                direction: ThresholdDirection::Above,
            },
            inputs,
            "",
        );
        assert!(seen[0].contains(" -uthr -4.5 "));
    }

    #[test]
    fn test_binary_maths_value_and_file() {
        let (_, seen) = run_with(
            &BinaryMaths::with_value(MathOp::Mul, -1.0),
            Outputs::from([("in_file".to_string(), json!("z.nii.gz"))]),
            "",
        );
        assert_eq!(seen, vec!["fslmaths z.nii.gz -mul -1 /w/z_maths.nii.gz"]);

        let (_, seen) = run_with(
            &BinaryMaths::with_file(MathOp::Sub),
            Outputs::from([
                ("in_file".to_string(), json!("z.nii.gz")),
                ("operand_file".to_string(), json!("n.nii.gz")),
            ]),
            "",
        );
        assert_eq!(seen, vec!["fslmaths z.nii.gz -sub n.nii.gz /w/z_maths.nii.gz"]);
    }

    #[test]
    fn test_image_stats_parses_stdout() {
        let (out, seen) = run_with(
            &ImageStats {
                op_string: "-p 50".to_string(),
            },
            Outputs::from([
                ("in_file".to_string(), json!("bold.nii.gz")),
                ("mask_file".to_string(), json!("mask.nii.gz")),
            ]),
            "812.250000 \n",
        );
        assert_eq!(seen, vec!["fslstats bold.nii.gz -k mask.nii.gz -p 50"]);
        assert_eq!(out["out_stat"], json!(812.25));
    }

    #[test]
    fn test_merge() {
        let (out, seen) = run_with(
            &Merge { dimension: 't' },
            Outputs::from([("in_files".to_string(), json!(["c1.nii.gz", "c2.nii.gz"]))]),
            "",
        );
        assert_eq!(seen, vec!["fslmerge -t /w/c1_merged.nii.gz c1.nii.gz c2.nii.gz"]);
        assert_eq!(out["merged_file"], json!("/w/c1_merged.nii.gz"));
    }

    #[test]
    fn test_image_maths_with_mask() {
        let (_, seen) = run_with(
            &ImageMaths::new("-mas", "_mask"),
            Outputs::from([
                ("in_file".to_string(), json!("bold.nii.gz")),
                ("in_file2".to_string(), json!("brain.nii.gz")),
            ]),
            "",
        );
        assert_eq!(seen, vec!["fslmaths bold.nii.gz -mas brain.nii.gz /w/bold_mask.nii.gz"]);
    }
}
