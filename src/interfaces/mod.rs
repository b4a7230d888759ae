//! Node interfaces - what a node does when it runs
//!
//! Every interface reads its inputs from a [`NodeContext`], may run external
//! tools through the context's [`CommandRunner`], and returns its outputs as
//! named JSON values.

pub mod fsl;
mod model;
mod ptoz;
mod utility;

pub use model::{L2Model, Level1DesignNode, RunInfoNode, SpecifyModel};
pub use ptoz::PtoZ;
pub use utility::{DataSource, DerivativesSink, IdentityInterface, SelectFiles};

use crate::core::runner::{CommandLine, CommandOutput, CommandRunner};
use crate::core::Outputs;
use crate::error::FlowError;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

pub trait Interface: Send + Sync + fmt::Debug {
    /// Short type name used in logs and graph exports
    fn kind(&self) -> &'static str;

    fn run(&self, ctx: &NodeContext<'_>) -> Result<Outputs, FlowError>;
}

/// Everything a node sees while it runs
pub struct NodeContext<'a> {
    pub name: &'a str,
    pub inputs: &'a Outputs,
    /// Private working directory of the node
    pub work_dir: &'a Path,
    runner: &'a dyn CommandRunner,
    commands: RefCell<Vec<String>>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        name: &'a str,
        inputs: &'a Outputs,
        work_dir: &'a Path,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            name,
            inputs,
            work_dir,
            runner,
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Run a tool; a non-zero exit is an error
    pub fn run(&self, cmd: CommandLine) -> Result<CommandOutput, FlowError> {
        log::info!("[{}] {}", self.name, cmd);
        self.commands.borrow_mut().push(cmd.to_string());
        let output = self.runner.run(&cmd)?;
        if !output.success() {
            return Err(FlowError::ToolFailed {
                program: cmd.program,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Command lines run so far
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    pub fn input(&self, field: &str) -> Result<&Value, FlowError> {
        self.inputs
            .get(field)
            .filter(|v| !v.is_null())
            .ok_or_else(|| FlowError::MissingInput {
                node: self.name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn has_input(&self, field: &str) -> bool {
        self.inputs.get(field).is_some_and(|v| !v.is_null())
    }

    fn type_error(&self, field: &str, expected: &'static str) -> FlowError {
        FlowError::InputType {
            node: self.name.to_string(),
            field: field.to_string(),
            expected,
        }
    }

    /// A single path; a one-element list is accepted
    pub fn path(&self, field: &str) -> Result<PathBuf, FlowError> {
        let value = self.input(field)?;
        let value = match value {
            Value::Array(items) if items.len() == 1 => &items[0],
            other => other,
        };
        value
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| self.type_error(field, "path"))
    }

    /// One or more paths, nested lists flattened
    pub fn paths(&self, field: &str) -> Result<Vec<PathBuf>, FlowError> {
        let mut out = Vec::new();
        flatten_paths(self.input(field)?, &mut out)
            .then_some(out)
            .ok_or_else(|| self.type_error(field, "path or list of paths"))
    }

    pub fn f64(&self, field: &str) -> Result<f64, FlowError> {
        self.input(field)?
            .as_f64()
            .ok_or_else(|| self.type_error(field, "number"))
    }

    pub fn i64(&self, field: &str) -> Result<i64, FlowError> {
        let value = self.input(field)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| self.type_error(field, "integer"))
    }

    pub fn string(&self, field: &str) -> Result<String, FlowError> {
        self.input(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.type_error(field, "string"))
    }

    /// Deserialize an input into a typed value
    pub fn typed<T: serde::de::DeserializeOwned>(&self, field: &str) -> Result<T, FlowError> {
        Ok(serde_json::from_value(self.input(field)?.clone())?)
    }

    /// `<work_dir>/<stem of in_file><suffix>.nii.gz`
    pub fn derived_image(&self, in_file: &Path, suffix: &str) -> PathBuf {
        let name = in_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");
        let (stem, _) = crate::bids::split_extension(name);
        self.work_dir.join(format!("{}{}.nii.gz", stem, suffix))
    }
}

fn flatten_paths(value: &Value, out: &mut Vec<PathBuf>) -> bool {
    match value {
        Value::String(s) => {
            out.push(PathBuf::from(s));
            true
        }
        Value::Array(items) => items.iter().all(|v| flatten_paths(v, out)),
        _ => false,
    }
}

/// JSON value of a path
pub fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

/// A single path as-is, several as a list
pub fn paths_value(paths: &[PathBuf]) -> Value {
    match paths {
        [one] => path_value(one),
        many => Value::Array(many.iter().map(|p| path_value(p)).collect()),
    }
}
