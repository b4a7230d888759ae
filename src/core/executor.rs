//! Node executor - runs node interfaces and reports back over a channel
//!
//! Interfaces block on external tools, so each submitted node runs on
//! tokio's blocking pool via `spawn_blocking`.

use super::runner::CommandRunner;
use super::Outputs;
use crate::error::FlowError;
use crate::interfaces::{Interface, NodeContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Node execution event
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started {
        task_id: String,
    },
    Completed {
        task_id: String,
        outputs: Outputs,
        commands: Vec<String>,
    },
    Failed {
        task_id: String,
        error: String,
        commands: Vec<String>,
    },
}

/// A node ready to run: its interface, resolved inputs and working directory
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub interface: Arc<dyn Interface>,
    pub inputs: Outputs,
    pub work_dir: PathBuf,
}

/// Runs jobs and emits [`TaskEvent`]s
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    event_tx: mpsc::UnboundedSender<TaskEvent>,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                runner,
                event_tx: tx,
            },
            rx,
        )
    }

    /// Submit a job to the blocking pool
    pub fn start_task(&self, job: Job) {
        log::info!("Starting node: {} ({})", job.task_id, job.interface.kind());
        let _ = self.event_tx.send(TaskEvent::Started {
            task_id: job.task_id.clone(),
        });

        let runner = self.runner.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let task_id = job.task_id.clone();
            let result = tokio::task::spawn_blocking(move || execute(&job, runner.as_ref())).await;
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    log::error!("Node {} join error: {}", task_id, e);
                    TaskEvent::Failed {
                        task_id,
                        error: format!("Internal error: {}", e),
                        commands: Vec::new(),
                    }
                }
            };
            let _ = event_tx.send(event);
        });
    }

    /// Run a job on the calling thread
    pub fn run_inline(&self, job: Job) {
        log::info!("Running node inline: {} ({})", job.task_id, job.interface.kind());
        let _ = self.event_tx.send(TaskEvent::Started {
            task_id: job.task_id.clone(),
        });
        let _ = self.event_tx.send(execute(&job, self.runner.as_ref()));
    }
}

fn execute(job: &Job, runner: &dyn CommandRunner) -> TaskEvent {
    let ctx = NodeContext::new(&job.task_id, &job.inputs, &job.work_dir, runner);
    let result: Result<Outputs, FlowError> = std::fs::create_dir_all(&job.work_dir)
        .map_err(FlowError::from)
        .and_then(|_| job.interface.run(&ctx));

    match result {
        Ok(outputs) => {
            log::info!("Node {} completed", job.task_id);
            TaskEvent::Completed {
                task_id: job.task_id.clone(),
                outputs,
                commands: ctx.commands(),
            }
        }
        Err(e) => {
            log::warn!("Node {} failed: {}", job.task_id, e);
            TaskEvent::Failed {
                task_id: job.task_id.clone(),
                error: e.to_string(),
                commands: ctx.commands(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::fsl::ScriptedRunner;
    use crate::interfaces::{IdentityInterface, PtoZ};
    use serde_json::json;
    use tempfile::TempDir;

    fn job(dir: &TempDir, interface: impl Interface + 'static, inputs: Outputs) -> Job {
        Job {
            task_id: "n".to_string(),
            interface: Arc::new(interface),
            inputs,
            work_dir: dir.path().join("n"),
        }
    }

    #[tokio::test]
    async fn test_start_task_reports_completion() {
        let dir = TempDir::new().unwrap();
        let (executor, mut rx) = Executor::new(Arc::new(ScriptedRunner::new()));
        let inputs = Outputs::from([("x".to_string(), json!(1))]);
        executor.start_task(job(&dir, IdentityInterface::new(&["x"]), inputs));

        assert!(matches!(rx.recv().await, Some(TaskEvent::Started { .. })));
        match rx.recv().await {
            Some(TaskEvent::Completed { outputs, .. }) => assert_eq!(outputs["x"], json!(1)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(dir.path().join("n").is_dir());
    }

    #[test]
    fn test_failure_keeps_commands() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().failing("ptoz");
        let (executor, mut rx) = Executor::new(Arc::new(runner));
        executor.run_inline(job(&dir, PtoZ::new(0.05), Outputs::new()));

        assert!(matches!(
            tokio_test::block_on(rx.recv()),
            Some(TaskEvent::Started { .. })
        ));
        match tokio_test::block_on(rx.recv()) {
            Some(TaskEvent::Failed { error, commands, .. }) => {
                assert!(error.contains("ptoz exited with code 1"));
                assert_eq!(commands, vec!["ptoz 0.05"]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
