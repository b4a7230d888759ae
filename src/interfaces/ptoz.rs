use super::{Interface, NodeContext};
use crate::core::runner::CommandLine;
use crate::core::Outputs;
use crate::error::FlowError;
use serde_json::Value;

/// Converts a p-value into a z threshold with `ptoz`.
///
/// With a `resels` input the conversion is Gaussian-random-field corrected (`-g`).
#[derive(Debug, Clone)]
pub struct PtoZ {
    pub pvalue: f64,
}

impl PtoZ {
    pub fn new(pvalue: f64) -> Self {
        Self { pvalue }
    }
}

impl Interface for PtoZ {
    fn kind(&self) -> &'static str {
        "ptoz"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let mut cmd = CommandLine::new("ptoz").arg(self.pvalue);
        if ctx.has_input("resels") {
            cmd = cmd.arg("-g").arg(ctx.f64("resels")?);
        }
        let output = ctx.run(cmd)?;

        let zstat = output
            .stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| FlowError::ToolOutput {
                program: "ptoz".to_string(),
                detail: format!("expected a z value, got {:?}", output.stdout.trim()),
            })?;

        Ok(Outputs::from([("zstat".to_string(), Value::from(zstat))]))
    }
}
