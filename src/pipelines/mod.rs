//! Analysis pipelines assembled as workflows

mod first_level;
mod second_level;
mod smooth;

pub use first_level::{default_regressors, first_level_wf, FirstLevelOptions, FEAT_RESULTS};
pub use second_level::{second_level_wf, GroupInputs, SecondLevelOptions};
pub use smooth::{susan_smooth_wf, BRIGHTNESS_FRACTION};
