//! Per-subject GLM pipeline

use super::smooth::susan_smooth_wf;
use crate::bids::DerivativeSpec;
use crate::core::{Node, Workflow};
use crate::error::FlowError;
use crate::interfaces::fsl::{Feat, FeatModel};
use crate::interfaces::{
    DataSource, DerivativesSink, Level1DesignNode, RunInfoNode, SelectFiles, SpecifyModel,
};
use crate::model::{Contrast, SubjectFiles};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Output tree of the first-level derivatives
pub const OUT_PATH_BASE: &str = "FSLAnalysis";

/// Result maps picked out of the FEAT directory, by sink suffix
pub const FEAT_RESULTS: [(&str, &str); 5] = [
    ("cope", "stats/cope1.nii.gz"),
    ("pe", "stats/pe[0-9][0-9].nii.gz"),
    ("tstat", "stats/tstat1.nii.gz"),
    ("varcope", "stats/varcope1.nii.gz"),
    ("zstat", "stats/zstat1.nii.gz"),
];

/// Confound columns used as nuisance regressors unless configured otherwise
pub fn default_regressors() -> Vec<String> {
    let mut names = vec!["dvars".to_string(), "framewise_displacement".to_string()];
    names.extend((0..6).map(|i| format!("a_comp_cor_{:02}", i)));
    names.extend((0..4).map(|i| format!("cosine{:02}", i)));
    names
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstLevelOptions {
    pub name: String,
    pub contrasts: Vec<Contrast>,
    /// `None` uses every confound column that is not a motion parameter
    pub regressors_names: Option<Vec<String>>,
    /// Seconds
    pub high_pass_filter_cutoff: f64,
    pub feat_mem_gb: f64,
}

impl Default for FirstLevelOptions {
    fn default() -> Self {
        Self {
            name: "wf_1st_level".to_string(),
            contrasts: Vec::new(),
            regressors_names: Some(default_regressors()),
            high_pass_filter_cutoff: 100.0,
            feat_mem_gb: 12.0,
        }
    }
}

/// Build the first-level workflow.
///
/// `datasource` iterates over the sorted subject ids; every node downstream of it
/// runs once per subject after [`Workflow::expand_iterables`].
pub fn first_level_wf(
    in_files: &BTreeMap<String, SubjectFiles>,
    output_dir: &Path,
    fwhm: f64,
    options: &FirstLevelOptions,
) -> Result<Workflow, FlowError> {
    let mut wf = Workflow::new(&options.name);

    let subjects: Vec<Value> = in_files.keys().map(|s| Value::from(s.as_str())).collect();
    wf.add_node(
        Node::new(
            "datasource",
            DataSource {
                in_dict: in_files.clone(),
            },
        )
        .iterables("sub", subjects),
    )?;

    let mut runinfo = Node::new("runinfo", RunInfoNode::default());
    if let Some(names) = &options.regressors_names {
        runinfo = runinfo.input("regressors_names", names.clone());
    }
    wf.add_node(runinfo)?;

    wf.add_workflow(susan_smooth_wf("susan")?)?;
    if let Some(inputnode) = wf.node_mut("susan.inputnode") {
        inputnode.inputs.insert("fwhm".to_string(), Value::from(fwhm));
    }

    wf.add_node(Node::new(
        "l1_spec",
        SpecifyModel {
            high_pass_filter_cutoff: options.high_pass_filter_cutoff,
        },
    ))?;
    wf.add_node(Node::new(
        "l1_model",
        Level1DesignNode {
            derivs: true,
            model_serial_correlations: true,
            contrasts: options.contrasts.clone(),
        },
    ))?;
    wf.add_node(Node::new("feat_spec", FeatModel))?;
    wf.add_node(Node::new("feat_fit", Feat).mem_gb(options.feat_mem_gb))?;
    wf.add_node(Node::new("feat_select", SelectFiles::new(&FEAT_RESULTS)))?;

    for (suffix, _) in FEAT_RESULTS {
        let sink = DerivativesSink {
            base_directory: output_dir.to_path_buf(),
            spec: DerivativeSpec {
                out_path_base: OUT_PATH_BASE.to_string(),
                suffix: suffix.to_string(),
                desc: Some("intask".to_string()),
                sub: None,
            },
        };
        wf.add_node(Node::new(format!("ds_{}", suffix), sink).run_without_submitting())?;
    }

    wf.connect_fields(
        "datasource",
        "susan.inputnode",
        &[("bold", "in_files"), ("mask", "mask_file")],
    )?;
    wf.connect_fields(
        "datasource",
        "runinfo",
        &[("events", "events_file"), ("regressors", "regressors_file")],
    )?;
    wf.connect("susan.outputnode", "smoothed_files", "l1_spec", "functional_runs")?;
    wf.connect("datasource", "tr", "l1_spec", "time_repetition")?;
    wf.connect("datasource", "tr", "l1_model", "interscan_interval")?;
    wf.connect("susan.outputnode", "smoothed_files", "runinfo", "in_file")?;
    wf.connect_fields(
        "runinfo",
        "l1_spec",
        &[("info", "subject_info"), ("realign_file", "realignment_parameters")],
    )?;
    wf.connect("l1_spec", "session_info", "l1_model", "session_info")?;
    wf.connect_fields(
        "l1_model",
        "feat_spec",
        &[("fsf_files", "fsf_file"), ("ev_files", "ev_files")],
    )?;
    wf.connect("l1_model", "fsf_files", "feat_fit", "fsf_file")?;
    wf.connect("feat_fit", "feat_dir", "feat_select", "base_directory")?;
    for (suffix, _) in FEAT_RESULTS {
        let sink = format!("ds_{}", suffix);
        wf.connect("datasource", "bold", &sink, "source_file")?;
        wf.connect("feat_select", suffix, &sink, "in_file")?;
    }

    Ok(wf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects(ids: &[&str]) -> BTreeMap<String, SubjectFiles> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    SubjectFiles {
                        bold: format!("/d/sub-{}/func/sub-{}_bold.nii.gz", id, id).into(),
                        mask: format!("/d/sub-{}_mask.nii.gz", id).into(),
                        events: format!("/d/sub-{}_events.tsv", id).into(),
                        regressors: format!("/d/sub-{}_confounds.tsv", id).into(),
                        tr: 2.0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_default_regressors() {
        let names = default_regressors();
        assert_eq!(names.len(), 12);
        assert_eq!(names[2], "a_comp_cor_00");
        assert_eq!(names[11], "cosine03");
    }

    #[test]
    fn test_first_level_nodes() {
        let wf = first_level_wf(
            &subjects(&["01"]),
            Path::new("/out"),
            6.0,
            &FirstLevelOptions::default(),
        )
        .unwrap();
        assert_eq!(wf.name, "wf_1st_level");
        for name in [
            "datasource",
            "susan.smooth",
            "runinfo",
            "l1_spec",
            "l1_model",
            "feat_spec",
            "feat_fit",
            "feat_select",
            "ds_cope",
            "ds_varcope",
            "ds_zstat",
            "ds_tstat",
            "ds_pe",
        ] {
            assert!(wf.node(name).is_some(), "missing {}", name);
        }
        assert_eq!(wf.node("feat_fit").unwrap().mem_gb, 12.0);
        assert!(wf.node("ds_pe").unwrap().run_without_submitting);
        assert_eq!(
            wf.node("susan.inputnode").unwrap().inputs["fwhm"],
            Value::from(6.0)
        );
        assert_eq!(wf.dependencies("feat_spec"), vec!["l1_model"]);
    }

    #[test]
    fn test_expands_per_subject() {
        let wf = first_level_wf(
            &subjects(&["03", "01", "02"]),
            Path::new("/out"),
            6.0,
            &FirstLevelOptions::default(),
        )
        .unwrap();
        let per_subject = wf.nodes().len();
        let expanded = wf.expand_iterables().unwrap();

        assert_eq!(expanded.nodes().len(), per_subject * 3);
        assert_eq!(
            expanded.node("_sub_02/datasource").unwrap().inputs["sub"],
            Value::from("02")
        );
        assert!(expanded.node("_sub_01/susan.smooth").is_some());
        assert_eq!(expanded.nodes()[0].name, "_sub_01/datasource");
    }
}
