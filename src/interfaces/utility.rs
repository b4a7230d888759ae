//! Plumbing nodes: pass-through, data source, file selection, derivatives staging

use super::{path_value, paths_value, Interface, NodeContext};
use crate::bids::DerivativeSpec;
use crate::core::Outputs;
use crate::error::FlowError;
use crate::helpers::{dict_ds, DATA_ITEMS};
use crate::model::SubjectFiles;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Passes its inputs through unchanged
#[derive(Debug, Clone)]
pub struct IdentityInterface {
    pub fields: Vec<String>,
}

impl IdentityInterface {
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Interface for IdentityInterface {
    fn kind(&self) -> &'static str {
        "identity"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        Ok(self
            .fields
            .iter()
            .filter_map(|f| ctx.inputs.get(f).map(|v| (f.clone(), v.clone())))
            .collect())
    }
}

/// Emits the inputs of the subject named by the `sub` input
#[derive(Debug, Clone)]
pub struct DataSource {
    pub in_dict: BTreeMap<String, SubjectFiles>,
}

impl Interface for DataSource {
    fn kind(&self) -> &'static str {
        "datasource"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let sub = ctx.string("sub")?;
        let (bold, mask, events, regressors, tr) = dict_ds(&self.in_dict, &sub)?;
        let values = [
            path_value(&bold),
            path_value(&mask),
            path_value(&events),
            path_value(&regressors),
            Value::from(tr),
        ];
        Ok(DATA_ITEMS
            .iter()
            .map(|k| k.to_string())
            .zip(values)
            .collect())
    }
}

/// Picks files under `base_directory` by glob-style templates
#[derive(Debug, Clone)]
pub struct SelectFiles {
    pub templates: BTreeMap<String, String>,
}

impl SelectFiles {
    pub fn new(templates: &[(&str, &str)]) -> Self {
        Self {
            templates: templates
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Interface for SelectFiles {
    fn kind(&self) -> &'static str {
        "select_files"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let base = ctx.path("base_directory")?;
        let mut outputs = Outputs::new();
        for (field, template) in &self.templates {
            let found = glob_paths(&base, template)?;
            if found.is_empty() {
                return Err(FlowError::NoMatch {
                    pattern: template.clone(),
                    base: base.display().to_string(),
                });
            }
            outputs.insert(field.clone(), paths_value(&found));
        }
        Ok(outputs)
    }
}

/// Translate one path component of a glob into an anchored regex
fn glob_component(pattern: &str) -> Result<Regex, FlowError> {
    let mut re = String::from("^");
    let mut in_class = false;
    for c in pattern.chars() {
        match c {
            '*' if !in_class => re.push_str("[^/]*"),
            '?' if !in_class => re.push('.'),
            '[' if !in_class => {
                in_class = true;
                re.push('[');
            }
            ']' if in_class => {
                in_class = false;
                re.push(']');
            }
            '!' if in_class && re.ends_with('[') => re.push('^'),
            c if in_class => re.push(c),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| FlowError::Unsupported(format!("file template '{}': {}", pattern, e)))
}

/// Sorted matches of a `/`-separated glob under `base`
pub fn glob_paths(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, FlowError> {
    let mut current = vec![base.to_path_buf()];
    for component in pattern.split('/').filter(|c| !c.is_empty()) {
        let mut next = Vec::new();
        if component.contains(['*', '?', '[']) {
            let re = glob_component(component)?;
            for dir in &current {
                let Ok(entries) = fs::read_dir(dir) else {
                    continue;
                };
                for entry in entries {
                    let entry = entry?;
                    if entry.file_name().to_str().is_some_and(|n| re.is_match(n)) {
                        next.push(entry.path());
                    }
                }
            }
        } else {
            next.extend(
                current
                    .iter()
                    .map(|d| d.join(component))
                    .filter(|p| p.exists()),
            );
        }
        current = next;
    }
    current.sort();
    Ok(current)
}

/// Copies result files into the derivatives tree
#[derive(Debug, Clone)]
pub struct DerivativesSink {
    pub base_directory: PathBuf,
    pub spec: DerivativeSpec,
}

impl Interface for DerivativesSink {
    fn kind(&self) -> &'static str {
        "derivatives_sink"
    }

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError> {
        let in_files = ctx.paths("in_file")?;
        let source_file = ctx.path("source_file")?;

        let staged = if in_files.len() == 1 {
            vec![self
                .spec
                .stage(&self.base_directory, &source_file, &in_files[0], None)?]
        } else {
            in_files
                .iter()
                .enumerate()
                .map(|(i, f)| self.spec.stage(&self.base_directory, &source_file, f, Some(i + 1)))
                .collect::<Result<Vec<_>, _>>()?
        };
        for out in &staged {
            log::info!("[{}] wrote {}", ctx.name, out.display());
        }

        let mut outputs = Outputs::new();
        outputs.insert("out_file".to_string(), paths_value(&staged));
        Ok(outputs)
    }
}
