//! Scripted stand-in for the FSL binaries
//!
//! Records every command, answers with canned stdout per program and creates the
//! files each tool would have written, so whole workflows can run without FSL.

use crate::core::runner::{CommandLine, CommandOutput, CommandRunner};
use crate::error::FlowError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ScriptedRunner {
    stdout: HashMap<String, String>,
    failing: Option<String>,
    seen: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stdout printed by `program`
    pub fn respond(mut self, program: &str, stdout: &str) -> Self {
        self.stdout.insert(program.to_string(), stdout.to_string());
        self
    }

    /// Make `program` exit with code 1
    pub fn failing(mut self, program: &str) -> Self {
        self.failing = Some(program.to_string());
        self
    }

    /// Plausible answers for the tools whose stdout is parsed
    pub fn with_fsl_defaults(self) -> Self {
        self.respond("fslstats", "812.5\n")
            .respond("smoothest", "DLH 0.0512\nVOLUME 228483\nRESELS 17.7\n")
            .respond("ptoz", "4.93\n")
            .respond("cluster", "Cluster Index\tVoxels\tP\n1\t120\t0.001\n")
    }

    /// Every command run so far, formatted
    pub fn commands(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.to_string()).collect()
    }

    pub fn invocations(&self, program: &str) -> usize {
        self.lock().iter().filter(|c| c.program == program).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CommandLine>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fabricate(&self, cmd: &CommandLine) -> Result<(), FlowError> {
        let cwd = cmd.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        let option = |name: &str| {
            let prefix = format!("--{}=", name);
            cmd.args
                .iter()
                .find_map(|a| a.strip_prefix(prefix.as_str()))
                .map(PathBuf::from)
        };

        let mut outputs: Vec<PathBuf> = Vec::new();
        match cmd.program.as_str() {
            "fslmaths" | "susan" => outputs.extend(cmd.args.last().map(PathBuf::from)),
            "fslmerge" => outputs.extend(cmd.args.get(1).map(PathBuf::from)),
            "cluster" => {
                outputs.extend(["othresh", "oindex", "olmax"].into_iter().filter_map(|o| option(o)));
            }
            "flameo" => {
                let logdir = cwd.join(option("ld").unwrap_or_else(|| PathBuf::from("stats")));
                for f in ["zstat1", "tstat1", "cope1", "varcope1", "res4d"] {
                    outputs.push(logdir.join(format!("{}.nii.gz", f)));
                }
            }
            "feat_model" => {
                if let Some(stem) = cmd.args.first() {
                    for ext in [".mat", ".con", ".png", "_cov.png"] {
                        outputs.push(cwd.join(format!("{}{}", stem, ext)));
                    }
                }
            }
            "feat" => {
                let stats = cwd.join("run0.feat").join("stats");
                for f in ["cope1", "varcope1", "zstat1", "tstat1"] {
                    outputs.push(stats.join(format!("{}.nii.gz", f)));
                }
                // One parameter estimate per design column, numbered without padding
                for i in 1..=12 {
                    outputs.push(stats.join(format!("pe{}.nii.gz", i)));
                }
            }
            _ => {}
        }

        for out in outputs {
            touch(&out)?;
        }
        Ok(())
    }
}

fn touch(path: &Path) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"")?;
    Ok(())
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, cmd: &CommandLine) -> Result<CommandOutput, FlowError> {
        self.lock().push(cmd.clone());

        if self.failing.as_deref() == Some(cmd.program.as_str()) {
            return Ok(CommandOutput {
                code: 1,
                stdout: String::new(),
                stderr: format!("{}: scripted failure", cmd.program),
            });
        }

        self.fabricate(cmd)?;
        Ok(CommandOutput {
            code: 0,
            stdout: self.stdout.get(&cmd.program).cloned().unwrap_or_default(),
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fabricates_cluster_outputs() {
        let dir = TempDir::new().unwrap();
        let thresh = dir.path().join("z_threshold.nii.gz");
        let runner = ScriptedRunner::new().with_fsl_defaults();
        let out = runner
            .run(
                &CommandLine::new("cluster")
                    .opt("in", "z.nii.gz")
                    .opt("othresh", thresh.display()),
            )
            .unwrap();
        assert!(thresh.exists());
        assert!(out.stdout.starts_with("Cluster Index"));
        assert_eq!(runner.invocations("cluster"), 1);
    }

    #[test]
    fn test_scripted_failure() {
        let runner = ScriptedRunner::new().failing("feat");
        let out = runner.run(&CommandLine::new("feat").arg("run0.fsf")).unwrap();
        assert_eq!(out.code, 1);
    }
}
