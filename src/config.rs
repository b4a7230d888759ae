//! Analysis configuration - YAML file describing inputs, outputs and execution limits

use crate::model::SubjectFiles;
use crate::pipelines::{FirstLevelOptions, GroupInputs, SecondLevelOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file looked up in the current directory
pub const LOCAL_CONFIG: &str = "featflow.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Node working directories and run records
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub first_level: Option<FirstLevelConfig>,
    #[serde(default)]
    pub second_level: Option<SecondLevelConfig>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            execution: ExecutionConfig::default(),
            first_level: None,
            second_level: None,
        }
    }
}

/// Local resource limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Nodes running at once
    pub n_procs: usize,
    /// Sum of `mem_gb` hints of running nodes
    pub memory_gb: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            n_procs: 1,
            memory_gb: 16.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstLevelConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_fwhm")]
    pub fwhm: f64,
    pub subjects: BTreeMap<String, SubjectFiles>,
    #[serde(flatten)]
    pub options: FirstLevelOptions,
}

fn default_fwhm() -> f64 {
    6.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondLevelConfig {
    pub output_dir: PathBuf,
    /// File whose name tags the group outputs
    pub bids_ref: PathBuf,
    #[serde(flatten)]
    pub inputs: GroupInputs,
    #[serde(flatten)]
    pub options: SecondLevelOptions,
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AnalysisConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// User-wide config location
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("featflow").join("config.yml"))
    }

    /// Load the config.
    /// Priority:
    /// 1. `explicit` (from `--config`)
    /// 2. featflow.yml in the current directory
    /// 3. the user config directory
    pub fn auto_load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, path.to_path_buf()));
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Ok((Self::from_file(local)?, local.to_path_buf()));
        }

        if let Some(user) = Self::user_path().filter(|p| p.exists()) {
            return Ok((Self::from_file(&user)?, user));
        }

        anyhow::bail!(
            "No config file found. Pass --config or create {} in the current directory.",
            LOCAL_CONFIG
        )
    }

    pub fn first_level(&self) -> Result<&FirstLevelConfig> {
        self.first_level
            .as_ref()
            .context("config has no first_level section")
    }

    pub fn second_level(&self) -> Result<&SecondLevelConfig> {
        self.second_level
            .as_ref()
            .context("config has no second_level section")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
work_dir: /tmp/featflow-work
execution:
  n_procs: 4
first_level:
  output_dir: /out
  subjects:
    "01":
      bold: /d/sub-01_bold.nii.gz
      mask: /d/sub-01_mask.nii.gz
      events: /d/sub-01_events.tsv
      regressors: /d/sub-01_confounds.tsv
      tr: 2.0
  contrasts:
    - name: AvsB
      conditions: [A, B]
      weights: [1.0, -1.0]
second_level:
  output_dir: /out
  bids_ref: /d/sub-01_bold.nii.gz
  group_mask: /d/group_mask.nii.gz
  in_copes: [/c1.nii.gz, /c2.nii.gz]
  in_varcopes: [/v1.nii.gz, /v2.nii.gz]
  cluster_threshold: 2.3
"#;

    #[test]
    fn test_parse_config() {
        let config: AnalysisConfig = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(config.execution.n_procs, 4);
        assert_eq!(config.execution.memory_gb, 16.0);

        let first = config.first_level().unwrap();
        assert_eq!(first.fwhm, 6.0);
        assert_eq!(first.subjects["01"].tr, 2.0);
        assert_eq!(first.options.contrasts[0].name, "AvsB");
        assert_eq!(first.options.name, "wf_1st_level");
        assert_eq!(first.options.regressors_names.as_ref().map(Vec::len), Some(12));

        let second = config.second_level().unwrap();
        assert_eq!(second.inputs.in_copes.len(), 2);
        assert_eq!(second.options.cluster_threshold, 2.3);
        assert_eq!(second.options.connectivity, 26);
    }

    #[test]
    fn test_defaults() {
        let config: AnalysisConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert!(config.first_level().is_err());
    }

    #[test]
    fn test_auto_load_explicit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("analysis.yml");
        std::fs::write(&path, CONFIG).unwrap();
        let (config, found) = AnalysisConfig::auto_load(Some(&path)).unwrap();
        assert_eq!(found, path);
        assert!(config.second_level.is_some());

        assert!(AnalysisConfig::auto_load(Some(&dir.path().join("missing.yml"))).is_err());
    }
}
