//! FSL command-line tools as node interfaces

mod feat;
mod group;
mod maths;
mod preprocess;
mod scripted;

pub use feat::{Feat, FeatModel};
pub use group::{Cluster, Flameo, SmoothEstimate};
pub use maths::{BinaryMaths, ImageMaths, ImageStats, MathOp, Merge, Threshold, ThresholdDirection};
pub use preprocess::Susan;
pub use scripted::ScriptedRunner;

use crate::error::FlowError;

/// First number printed by a tool
fn parse_number(program: &str, stdout: &str) -> Result<f64, FlowError> {
    stdout
        .split_whitespace()
        .find_map(|tok| tok.parse::<f64>().ok())
        .ok_or_else(|| FlowError::ToolOutput {
            program: program.to_string(),
            detail: format!("no number in {:?}", stdout.trim()),
        })
}
