//! Derivatives naming - place result files under a BIDS-like derivatives tree

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DATATYPES: [&str; 6] = ["func", "anat", "dwi", "fmap", "perf", "beh"];
const EXTENSIONS: [&str; 6] = [".nii.gz", ".nii", ".tsv", ".txt", ".json", ".mat"];

/// Metadata tags of one derivatives output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivativeSpec {
    /// Directory under the base directory, e.g. `FSLAnalysis`
    pub out_path_base: String,
    pub suffix: String,
    #[serde(default)]
    pub desc: Option<String>,
    /// Overrides the subject taken from the source file
    #[serde(default)]
    pub sub: Option<String>,
}

/// Split `name` into stem and a known extension
pub fn split_extension(name: &str) -> (&str, &str) {
    for ext in EXTENSIONS {
        if let Some(stem) = name.strip_suffix(ext) {
            return (stem, ext);
        }
    }
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// Key-value entities of a BIDS file name, in order, without its suffix
pub fn entities(file_name: &str) -> Vec<(String, String)> {
    let (stem, _) = split_extension(file_name);
    stem.split('_')
        .filter_map(|part| part.split_once('-'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl DerivativeSpec {
    /// Destination of `in_file` given the naming `source_file`.
    ///
    /// `index` tags one element of a multi-file output.
    pub fn destination(
        &self,
        base_directory: &Path,
        source_file: &Path,
        in_file: &Path,
        index: Option<usize>,
    ) -> PathBuf {
        let source_name = source_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let mut tags: Vec<(String, String)> = entities(source_name)
            .into_iter()
            .filter(|(k, _)| k != "desc")
            .collect();

        if let Some(sub) = &self.sub {
            match tags.iter_mut().find(|(k, _)| k == "sub") {
                Some(tag) => tag.1 = sub.clone(),
                None => tags.insert(0, ("sub".to_string(), sub.clone())),
            }
        }
        if let Some(i) = index {
            tags.push(("idx".to_string(), format!("{:02}", i)));
        }
        if let Some(desc) = &self.desc {
            tags.push(("desc".to_string(), desc.clone()));
        }

        let mut dir = base_directory.join(&self.out_path_base);
        if let Some((_, sub)) = tags.iter().find(|(k, _)| k == "sub") {
            dir.push(format!("sub-{}", sub));
        }
        if let Some((_, ses)) = tags.iter().find(|(k, _)| k == "ses") {
            dir.push(format!("ses-{}", ses));
        }
        let datatype = source_file
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .filter(|n| DATATYPES.contains(n))
            .unwrap_or("func");
        dir.push(datatype);

        let in_name = in_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (_, ext) = split_extension(in_name);

        let mut name: Vec<String> = tags.iter().map(|(k, v)| format!("{}-{}", k, v)).collect();
        name.push(self.suffix.clone());
        dir.join(format!("{}{}", name.join("_"), ext))
    }

    /// Copy `in_file` to its destination, creating directories as needed
    pub fn stage(
        &self,
        base_directory: &Path,
        source_file: &Path,
        in_file: &Path,
        index: Option<usize>,
    ) -> Result<PathBuf, FlowError> {
        let out = self.destination(base_directory, source_file, in_file, index);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(in_file, &out)?;
        log::debug!("Staged {} -> {}", in_file.display(), out.display());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(suffix: &str, desc: Option<&str>, sub: Option<&str>) -> DerivativeSpec {
        DerivativeSpec {
            out_path_base: "FSLAnalysis".into(),
            suffix: suffix.into(),
            desc: desc.map(str::to_string),
            sub: sub.map(str::to_string),
        }
    }

    #[test]
    fn test_entities() {
        let tags = entities("sub-01_task-stop_space-MNI_desc-preproc_bold.nii.gz");
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["sub", "task", "space", "desc"]);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("zstat1.nii.gz"), ("zstat1", ".nii.gz"));
        assert_eq!(split_extension("lmax.txt"), ("lmax", ".txt"));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }

    #[test]
    fn test_first_level_destination() {
        let out = spec("cope", Some("intask"), None).destination(
            Path::new("/out"),
            Path::new("/bids/sub-01/func/sub-01_task-stop_desc-preproc_bold.nii.gz"),
            Path::new("/work/stats/cope1.nii.gz"),
            None,
        );
        assert_eq!(
            out,
            PathBuf::from("/out/FSLAnalysis/sub-01/func/sub-01_task-stop_desc-intask_cope.nii.gz")
        );
    }

    #[test]
    fn test_group_destination_overrides_subject() {
        let out = spec("plocalmax", Some("intask"), Some("all")).destination(
            Path::new("/out"),
            Path::new("/bids/sub-01/func/sub-01_task-stop_bold.nii.gz"),
            Path::new("/work/zstat1_localmax.txt"),
            None,
        );
        assert_eq!(
            out,
            PathBuf::from("/out/FSLAnalysis/sub-all/func/sub-all_task-stop_desc-intask_plocalmax.txt")
        );
    }

    #[test]
    fn test_indexed_destination() {
        let out = spec("pe", Some("intask"), None).destination(
            Path::new("/out"),
            Path::new("sub-02_task-x_bold.nii.gz"),
            Path::new("pe03.nii.gz"),
            Some(3),
        );
        assert_eq!(
            out,
            PathBuf::from("/out/FSLAnalysis/sub-02/func/sub-02_task-x_idx-03_desc-intask_pe.nii.gz")
        );
    }

    #[test]
    fn test_stage_copies() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("zstat1.nii.gz");
        fs::write(&src, b"z").unwrap();
        let out = spec("zstat", None, Some("all"))
            .stage(dir.path(), Path::new("sub-01_bold.nii.gz"), &src, None)
            .unwrap();
        assert!(out.ends_with("FSLAnalysis/sub-all/func/sub-all_zstat.nii.gz"));
        assert_eq!(fs::read(out).unwrap(), b"z");
    }
}
