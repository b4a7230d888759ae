//! Run loop - dispatches ready nodes within the resource budget and collects results

use crate::config::ExecutionConfig;
use crate::core::runner::CommandRunner;
use crate::core::{Executor, Job, NodeStatus, Outputs, Scheduler, TaskEvent, Workflow};
use crate::session::Session;
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: String,
    pub completed: usize,
    /// Node name and error
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub session_file: Option<PathBuf>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Application state for one workflow run
pub struct App {
    pub workflow: Workflow,
    pub scheduler: Scheduler,
    pub executor: Executor,
    pub event_rx: mpsc::UnboundedReceiver<TaskEvent>,
    pub results: HashMap<String, Outputs>,
    pub session: Session,
    work_dir: PathBuf,
    limits: ExecutionConfig,
    /// Memory hints of submitted nodes still running
    reserved: HashMap<String, f64>,
    stopping: bool,
}

impl App {
    /// Expand iterables and prepare a run of `workflow` under `work_dir`
    pub fn new(
        workflow: &Workflow,
        runner: Arc<dyn CommandRunner>,
        work_dir: &Path,
        limits: ExecutionConfig,
    ) -> Result<Self> {
        // Tools run with their node directory as cwd, so paths handed to them must be absolute
        let work_dir = std::path::absolute(work_dir)?;
        let workflow = workflow.expand_iterables()?;
        let scheduler = Scheduler::new(&workflow)?;
        let (executor, event_rx) = Executor::new(runner);

        let mut session = Session::new(workflow.name.clone());
        for name in scheduler.order() {
            session.register(name);
        }

        Ok(Self {
            workflow,
            scheduler,
            executor,
            event_rx,
            results: HashMap::new(),
            session,
            work_dir,
            limits,
            reserved: HashMap::new(),
            stopping: false,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Execution order with each node's dependencies
    pub fn plan(&self) -> Vec<(String, Vec<String>)> {
        self.scheduler
            .order()
            .iter()
            .map(|name| (name.clone(), self.workflow.dependencies(name)))
            .collect()
    }

    fn fits(&self, mem_gb: f64) -> bool {
        if self.reserved.is_empty() {
            // An oversized node still runs, alone
            return true;
        }
        let used: f64 = self.reserved.values().sum();
        self.reserved.len() < self.limits.n_procs.max(1) && used + mem_gb <= self.limits.memory_gb
    }

    /// Start every ready node the budget allows
    pub fn start_ready_tasks(&mut self) -> Result<()> {
        for name in self.scheduler.schedule_next() {
            if self.stopping {
                break;
            }
            let Some(node) = self.workflow.node(&name) else {
                continue;
            };
            let interface = node.interface.clone();
            let inline = node.run_without_submitting;
            let mem_gb = node.mem_gb;
            if !inline && !self.fits(mem_gb) {
                continue;
            }

            let inputs = match self.workflow.resolve_inputs(&name, &self.results) {
                Ok(inputs) => inputs,
                Err(e) => {
                    self.scheduler.mark_started(&name)?;
                    self.finish_failed(&name, e.to_string(), Vec::new())?;
                    continue;
                }
            };
            let job = Job {
                task_id: name.clone(),
                interface,
                inputs,
                work_dir: self.workflow.node_dir(&self.work_dir, &name),
            };

            self.scheduler.mark_started(&name)?;
            self.session.start_node(&name);
            if inline {
                self.executor.run_inline(job);
            } else {
                self.reserved.insert(name.clone(), mem_gb);
                self.executor.start_task(job);
            }
        }
        Ok(())
    }

    fn finish_failed(&mut self, name: &str, error: String, commands: Vec<String>) -> Result<()> {
        log::error!("Node {} failed: {}", name, error);
        self.reserved.remove(name);
        for skipped in self.scheduler.mark_failed(name)? {
            log::warn!("Skipping {} (upstream {} failed)", skipped, name);
            self.session.skip_node(&skipped);
        }
        self.session
            .end_node(name, NodeStatus::Failed, commands, Some(error));
        self.stopping = true;
        Ok(())
    }

    /// Apply one executor event
    pub fn process_event(&mut self, event: TaskEvent) -> Result<()> {
        match event {
            TaskEvent::Started { task_id } => {
                log::debug!("Node started: {}", task_id);
            }
            TaskEvent::Completed {
                task_id,
                outputs,
                commands,
            } => {
                self.reserved.remove(&task_id);
                self.scheduler.mark_done(&task_id)?;
                self.session
                    .end_node(&task_id, NodeStatus::Done, commands, None);
                self.results.insert(task_id, outputs);
            }
            TaskEvent::Failed {
                task_id,
                error,
                commands,
            } => {
                self.finish_failed(&task_id, error, commands)?;
            }
        }
        Ok(())
    }

    fn save_session(&self) -> Option<PathBuf> {
        match self.session.save(&self.work_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Failed to save session: {}", e);
                None
            }
        }
    }

    /// Run until every node finished, or until running nodes drain after a failure
    pub async fn run(&mut self) -> Result<RunReport> {
        log::info!(
            "Running {} ({} nodes, n_procs {}, memory {} GB)",
            self.workflow.name,
            self.workflow.nodes().len(),
            self.limits.n_procs,
            self.limits.memory_gb
        );

        loop {
            self.start_ready_tasks()?;
            if self.scheduler.get_running().is_empty() {
                break;
            }
            let Some(event) = self.event_rx.recv().await else {
                break;
            };
            self.process_event(event)?;
            while let Ok(event) = self.event_rx.try_recv() {
                self.process_event(event)?;
            }
            self.save_session();
        }

        let mut skipped = Vec::new();
        for name in self.scheduler.order().to_vec() {
            match self.scheduler.status(&name) {
                Some(NodeStatus::Pending) => {
                    self.session.skip_node(&name);
                    skipped.push(name);
                }
                Some(NodeStatus::Skipped) => skipped.push(name),
                _ => {}
            }
        }
        self.session.end();
        let session_file = self.save_session();

        let failed = self
            .session
            .nodes
            .iter()
            .filter(|(_, run)| run.status == NodeStatus::Failed)
            .map(|(name, run)| (name.clone(), run.error.clone().unwrap_or_default()))
            .collect();

        Ok(RunReport {
            workflow: self.workflow.name.clone(),
            completed: self.results.len(),
            failed,
            skipped,
            session_file,
        })
    }
}
