//! Analysis data model - input bundles, event/confound parsing and GLM designs

mod contrast;
mod level1;
mod level2;
mod runinfo;
mod specify;
mod table;

pub use contrast::{Contrast, StatType};
pub use level1::{Level1Design, Level1Outputs};
pub use level2::{write_l2_model, L2ModelFiles};
pub use runinfo::{bids_to_runinfo, RegressorSelection, RunInfo, RunInfoOptions, MOTION_COLUMNS};
pub use specify::{specify_model, Condition, Regressor, SessionInfo};
pub use table::Table;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inputs for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectFiles {
    /// Preprocessed functional image
    pub bold: PathBuf,
    /// Brain mask
    pub mask: PathBuf,
    /// Events table (BIDS `*_events.tsv`)
    pub events: PathBuf,
    /// Confounds table
    pub regressors: PathBuf,
    /// Repetition time in seconds
    pub tr: f64,
}
