//! External command invocation

use crate::error::FlowError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A program invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.display())
    }

    /// `--name=value` style option
    pub fn opt(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{}={}", name, value))
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external tools on behalf of interfaces
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &CommandLine) -> Result<CommandOutput, FlowError>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &CommandLine) -> Result<CommandOutput, FlowError> {
        log::debug!("exec: {}", cmd);
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let output = command.output()?;
        Ok(CommandOutput {
            // Killed by a signal
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaces() {
        let cmd = CommandLine::new("fslmaths")
            .arg("in.nii.gz")
            .arg("-mul")
            .arg(-1)
            .arg("out file.nii.gz");
        assert_eq!(cmd.to_string(), "fslmaths in.nii.gz -mul -1 'out file.nii.gz'");
    }

    #[test]
    fn test_opt_format() {
        let cmd = CommandLine::new("cluster").opt("thresh", 3.2).opt("connectivity", 26);
        assert_eq!(cmd.args, vec!["--thresh=3.2", "--connectivity=26"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_output() {
        let out = ProcessRunner
            .run(&CommandLine::new("sh").arg("-c").arg("echo 1.5; exit 3"))
            .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "1.5");
        assert!(!out.success());
    }
}
