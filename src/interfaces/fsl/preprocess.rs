use crate::core::runner::CommandLine;
use crate::core::Outputs;
use crate::error::FlowError;
use crate::interfaces::{path_value, Interface, NodeContext};

/// SUSAN edge-preserving smoothing.
///
/// Inputs: `in_file`, `fwhm` (mm), `brightness_threshold`, `usan_image`.
/// The USAN image is used with the same brightness threshold.
#[derive(Debug, Clone)]
pub struct Susan {
    pub dimension: u8,
    pub use_median: bool,
}

impl Default for Susan {
    fn default() -> Self {
        Self {
            dimension: 3,
            use_median: true,
        }
    }
}

/// Gaussian sigma of a kernel with the given full width at half maximum
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (8.0 * 2f64.ln()).sqrt()
}

impl Interface for Susan {
    fn kind(&self) -> &'static str {
        "susan"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_file = ctx.path("in_file")?;
        let sigma = fwhm_to_sigma(ctx.f64("fwhm")?);
        let bt = ctx.f64("brightness_threshold")?;
        let out_file = ctx.derived_image(&in_file, "_smooth");

        let mut cmd = CommandLine::new("susan")
            .path(&in_file)
            .arg(bt)
            .arg(format!("{:.8}", sigma))
            .arg(self.dimension)
            .arg(self.use_median as u8);
        if ctx.has_input("usan_image") {
            cmd = cmd.arg(1).path(&ctx.path("usan_image")?).arg(bt);
        } else {
            cmd = cmd.arg(0);
        }
        ctx.run(cmd.path(&out_file))?;

        Ok(Outputs::from([("smoothed_file".to_string(), path_value(&out_file))]))
    }
}
