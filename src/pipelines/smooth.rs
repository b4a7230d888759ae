use crate::core::{Node, Transform, Workflow};
use crate::error::FlowError;
use crate::interfaces::fsl::{ImageMaths, ImageStats, Susan};
use crate::interfaces::IdentityInterface;

/// Brightness threshold of SUSAN as a fraction of the masked median intensity
pub const BRIGHTNESS_FRACTION: f64 = 0.75;

/// Masked SUSAN smoothing.
///
/// Inputs on `inputnode`: `in_files`, `mask_file`, `fwhm`. Result on
/// `outputnode.smoothed_files`.
pub fn susan_smooth_wf(name: &str) -> Result<Workflow, FlowError> {
    let mut wf = Workflow::new(name);

    wf.add_node(Node::new(
        "inputnode",
        IdentityInterface::new(&["in_files", "mask_file", "fwhm"]),
    ))?;
    wf.add_node(Node::new("mask", ImageMaths::new("-mas", "_mask")))?;
    wf.add_node(Node::new("meanfunc", ImageMaths::new("-Tmean", "_mean")))?;
    wf.add_node(Node::new(
        "median",
        ImageStats {
            op_string: "-p 50".to_string(),
        },
    ))?;
    wf.add_node(Node::new("smooth", Susan::default()))?;
    wf.add_node(Node::new(
        "outputnode",
        IdentityInterface::new(&["smoothed_files"]),
    ))?;

    wf.connect_fields("inputnode", "mask", &[("in_files", "in_file"), ("mask_file", "in_file2")])?;
    wf.connect("mask", "out_file", "meanfunc", "in_file")?;
    wf.connect_fields("inputnode", "median", &[("in_files", "in_file"), ("mask_file", "mask_file")])?;
    wf.connect_fields("inputnode", "smooth", &[("in_files", "in_file"), ("fwhm", "fwhm")])?;
    wf.connect_with(
        "median",
        "out_stat",
        "smooth",
        "brightness_threshold",
        Some(Transform::Scale(BRIGHTNESS_FRACTION)),
    )?;
    wf.connect("meanfunc", "out_file", "smooth", "usan_image")?;
    wf.connect("smooth", "smoothed_file", "outputnode", "smoothed_files")?;

    Ok(wf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_susan_smooth_order() {
        let wf = susan_smooth_wf("susan").unwrap();
        let order = wf.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("mask") < pos("meanfunc"));
        assert!(pos("meanfunc") < pos("smooth"));
        assert!(pos("median") < pos("smooth"));
        assert_eq!(order.last().map(String::as_str), Some("outputnode"));
    }

    #[test]
    fn test_brightness_is_scaled_median() {
        let wf = susan_smooth_wf("susan").unwrap();
        let edge = wf
            .edges()
            .iter()
            .find(|e| e.target_field == "brightness_threshold")
            .unwrap();
        assert_eq!(edge.source, "median");
        assert_eq!(edge.transform, Some(Transform::Scale(0.75)));
    }
}
