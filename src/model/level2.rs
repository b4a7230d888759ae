//! One-sample group design in FSL's VEST format

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2ModelFiles {
    pub design_mat: PathBuf,
    pub design_con: PathBuf,
    pub design_grp: PathBuf,
}

/// Write design.mat, design.con and design.grp for `num_copes` inputs into `out_dir`
pub fn write_l2_model(num_copes: usize, out_dir: &Path) -> Result<L2ModelFiles, FlowError> {
    if num_copes == 0 {
        return Err(FlowError::Unsupported("a group design with no inputs".to_string()));
    }
    fs::create_dir_all(out_dir)?;

    let ones: String = (0..num_copes).map(|_| "1\n").collect();

    let mut mat = String::new();
    let _ = writeln!(mat, "/NumWaves\t1\n/NumPoints\t{}\n/PPheights\t1\n\n/Matrix", num_copes);
    mat.push_str(&ones);

    let mut con = String::new();
    let _ = writeln!(
        con,
        "/ContrastName1\tgroup mean\n/NumWaves\t1\n/NumContrasts\t1\n/PPheights\t1\n/RequiredEffect\t100\n\n/Matrix\n1"
    );

    let mut grp = String::new();
    let _ = writeln!(grp, "/NumWaves\t1\n/NumPoints\t{}\n\n/Matrix", num_copes);
    grp.push_str(&ones);

    let files = L2ModelFiles {
        design_mat: out_dir.join("design.mat"),
        design_con: out_dir.join("design.con"),
        design_grp: out_dir.join("design.grp"),
    };
    fs::write(&files.design_mat, mat)?;
    fs::write(&files.design_con, con)?;
    fs::write(&files.design_grp, grp)?;
    Ok(files)
}
