//! Group-level one-sample pipeline with FWE and cluster-extent thresholding

use crate::bids::DerivativeSpec;
use crate::core::{Node, Transform, Workflow};
use crate::error::FlowError;
use crate::interfaces::fsl::{
    BinaryMaths, Cluster, Flameo, MathOp, Merge, SmoothEstimate, Threshold, ThresholdDirection,
};
use crate::interfaces::{path_value, DerivativesSink, IdentityInterface, L2Model, PtoZ};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output tree of the group derivatives
pub const OUT_PATH_BASE: &str = "grp_all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondLevelOptions {
    pub name: String,
    /// One-tailed p of the voxelwise FWE threshold
    pub fwe_pvalue: f64,
    pub cluster_threshold: f64,
    pub cluster_pthreshold: f64,
    pub connectivity: u32,
    pub fdr: bool,
}

impl Default for SecondLevelOptions {
    fn default() -> Self {
        Self {
            name: "wf_2nd_level".to_string(),
            fwe_pvalue: 0.025,
            cluster_threshold: 3.2,
            cluster_pthreshold: 0.025,
            connectivity: 26,
            fdr: false,
        }
    }
}

/// Group inputs fed to `inputnode`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInputs {
    pub group_mask: PathBuf,
    pub in_copes: Vec<PathBuf>,
    pub in_varcopes: Vec<PathBuf>,
}

impl GroupInputs {
    pub fn apply(&self, wf: &mut Workflow) -> Result<(), FlowError> {
        if self.in_copes.len() != self.in_varcopes.len() {
            return Err(FlowError::InputType {
                node: "inputnode".to_string(),
                field: "in_varcopes".to_string(),
                expected: "one varcope per cope",
            });
        }
        let node = wf
            .node_mut("inputnode")
            .ok_or_else(|| FlowError::UnknownNode("inputnode".to_string()))?;
        node.inputs.insert("group_mask".to_string(), path_value(&self.group_mask));
        node.inputs.insert(
            "in_copes".to_string(),
            serde_json::Value::Array(self.in_copes.iter().map(|p| path_value(p)).collect()),
        );
        node.inputs.insert(
            "in_varcopes".to_string(),
            serde_json::Value::Array(self.in_varcopes.iter().map(|p| path_value(p)).collect()),
        );
        Ok(())
    }
}

/// Sink name, result suffix, desc
const SINKS: [(&str, &str, Option<&str>); 7] = [
    ("ds_zraw", "zstat", None),
    ("ds_zfwe", "zstat", Some("fwe")),
    ("ds_zclust", "zstat", Some("clust")),
    ("ds_clustidx_pos", "pclusterindex", None),
    ("ds_clustlmax_pos", "plocalmax", Some("intask")),
    ("ds_clustidx_neg", "nclusterindex", None),
    ("ds_clustlmax_neg", "nlocalmax", Some("intask")),
];

/// Build the second-level workflow.
///
/// Group inputs go on `inputnode` (see [`GroupInputs::apply`]); `bids_ref` names
/// every staged output.
pub fn second_level_wf(
    output_dir: &Path,
    bids_ref: &Path,
    options: &SecondLevelOptions,
) -> Result<Workflow, FlowError> {
    if options.fdr {
        return Err(FlowError::Unsupported("FDR correction".to_string()));
    }
    let mut wf = Workflow::new(&options.name);

    wf.add_node(Node::new(
        "inputnode",
        IdentityInterface::new(&["group_mask", "in_copes", "in_varcopes"]),
    ))?;
    wf.add_node(Node::new(
        "outputnode",
        IdentityInterface::new(&[
            "zstats_raw",
            "zstats_fwe",
            "zstats_clust",
            "clust_index_file",
            "clust_localmax_txt_file",
        ]),
    ))?;

    wf.add_node(Node::new("l2_model", L2Model))?;
    wf.add_node(Node::new("flameo_ols", Flameo::ols()))?;
    wf.add_node(Node::new("merge_copes", Merge { dimension: 't' }))?;
    wf.add_node(Node::new("merge_varcopes", Merge { dimension: 't' }))?;

    // FWE
    wf.add_node(Node::new("smoothness", SmoothEstimate))?;
    wf.add_node(Node::new("fwe_ptoz", PtoZ::new(options.fwe_pvalue)))?;
    wf.add_node(Node::new(
        "fwe_nonsig0",
        Threshold {
            direction: ThresholdDirection::Above,
        },
    ))?;
    wf.add_node(Node::new(
        "fwe_nonsig1",
        Threshold {
            direction: ThresholdDirection::Below,
        },
    ))?;
    wf.add_node(Node::new("fwe_thresh", BinaryMaths::with_file(MathOp::Sub)))?;

    // Cluster
    let cluster = Cluster {
        threshold: options.cluster_threshold,
        pthreshold: options.cluster_pthreshold,
        connectivity: options.connectivity,
    };
    wf.add_node(Node::new("cluster_pos", cluster.clone()))?;
    wf.add_node(Node::new("cluster_neg", cluster))?;
    wf.add_node(Node::new("zstat_inv", BinaryMaths::with_value(MathOp::Mul, -1.0)))?;
    wf.add_node(Node::new("cluster_inv", BinaryMaths::with_value(MathOp::Mul, -1.0)))?;
    wf.add_node(Node::new("cluster_all", BinaryMaths::with_file(MathOp::Add)))?;

    for (name, suffix, desc) in SINKS {
        let sink = DerivativesSink {
            base_directory: output_dir.to_path_buf(),
            spec: DerivativeSpec {
                out_path_base: OUT_PATH_BASE.to_string(),
                suffix: suffix.to_string(),
                desc: desc.map(str::to_string),
                sub: Some("all".to_string()),
            },
        };
        wf.add_node(
            Node::new(name, sink)
                .input("source_file", path_value(bids_ref))
                .run_without_submitting(),
        )?;
    }

    wf.connect_with("inputnode", "in_copes", "l2_model", "num_copes", Some(Transform::Len))?;
    wf.connect("inputnode", "group_mask", "flameo_ols", "mask_file")?;
    wf.connect("inputnode", "group_mask", "smoothness", "mask_file")?;
    wf.connect_with("inputnode", "in_copes", "smoothness", "dof", Some(Transform::Dof))?;
    wf.connect("inputnode", "in_copes", "merge_copes", "in_files")?;
    wf.connect("inputnode", "in_varcopes", "merge_varcopes", "in_files")?;

    wf.connect_fields(
        "l2_model",
        "flameo_ols",
        &[
            ("design_mat", "design_file"),
            ("design_con", "t_con_file"),
            ("design_grp", "cov_split_file"),
        ],
    )?;
    wf.connect("merge_copes", "merged_file", "flameo_ols", "cope_file")?;
    wf.connect("merge_varcopes", "merged_file", "flameo_ols", "var_cope_file")?;
    wf.connect("flameo_ols", "res4d", "smoothness", "residual_fit_file")?;

    wf.connect("flameo_ols", "zstats", "fwe_nonsig0", "in_file")?;
    wf.connect("fwe_nonsig0", "out_file", "fwe_nonsig1", "in_file")?;
    wf.connect("smoothness", "resels", "fwe_ptoz", "resels")?;
    wf.connect("fwe_ptoz", "zstat", "fwe_nonsig0", "thresh")?;
    wf.connect_with("fwe_ptoz", "zstat", "fwe_nonsig1", "thresh", Some(Transform::Neg))?;
    wf.connect("flameo_ols", "zstats", "fwe_thresh", "in_file")?;
    wf.connect("fwe_nonsig1", "out_file", "fwe_thresh", "operand_file")?;

    wf.connect("flameo_ols", "zstats", "cluster_pos", "in_file")?;
    wf.connect("merge_copes", "merged_file", "cluster_pos", "cope_file")?;
    wf.connect_fields("smoothness", "cluster_pos", &[("volume", "volume"), ("dlh", "dlh")])?;
    wf.connect("flameo_ols", "zstats", "zstat_inv", "in_file")?;
    wf.connect("zstat_inv", "out_file", "cluster_neg", "in_file")?;
    wf.connect("cluster_neg", "threshold_file", "cluster_inv", "in_file")?;
    wf.connect("merge_copes", "merged_file", "cluster_neg", "cope_file")?;
    wf.connect_fields("smoothness", "cluster_neg", &[("volume", "volume"), ("dlh", "dlh")])?;
    wf.connect("cluster_pos", "threshold_file", "cluster_all", "in_file")?;
    wf.connect("cluster_inv", "out_file", "cluster_all", "operand_file")?;

    wf.connect("flameo_ols", "zstats", "ds_zraw", "in_file")?;
    wf.connect("fwe_thresh", "out_file", "ds_zfwe", "in_file")?;
    wf.connect("cluster_all", "out_file", "ds_zclust", "in_file")?;
    wf.connect("cluster_pos", "index_file", "ds_clustidx_pos", "in_file")?;
    wf.connect("cluster_pos", "localmax_txt_file", "ds_clustlmax_pos", "in_file")?;
    wf.connect("cluster_neg", "index_file", "ds_clustidx_neg", "in_file")?;
    wf.connect("cluster_neg", "localmax_txt_file", "ds_clustlmax_neg", "in_file")?;

    wf.connect("flameo_ols", "zstats", "outputnode", "zstats_raw")?;
    wf.connect("fwe_thresh", "out_file", "outputnode", "zstats_fwe")?;
    wf.connect("cluster_all", "out_file", "outputnode", "zstats_clust")?;
    wf.connect("cluster_pos", "index_file", "outputnode", "clust_index_file")?;
    wf.connect("cluster_pos", "localmax_txt_file", "outputnode", "clust_localmax_txt_file")?;

    Ok(wf)
}
