//! Run records - what each node ran and how it ended

use crate::core::NodeStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub nodes: BTreeMap<String, NodeRun>,
}

/// A single node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRun {
    fn pending() -> Self {
        Self {
            started: None,
            ended: None,
            status: NodeStatus::Pending,
            commands: Vec::new(),
            error: None,
        }
    }
}

impl Session {
    pub fn new(workflow: impl Into<String>) -> Self {
        let started_at = Utc::now();
        Self {
            id: started_at.format("%Y-%m-%d-%H-%M-%S").to_string(),
            workflow: workflow.into(),
            started_at,
            ended_at: None,
            nodes: BTreeMap::new(),
        }
    }

    pub fn sessions_dir(work_dir: &Path) -> PathBuf {
        work_dir.join("sessions")
    }

    /// Write `<work_dir>/sessions/<id>.json` and point `latest.json` at it
    pub fn save(&self, work_dir: &Path) -> Result<PathBuf> {
        let dir = Self::sessions_dir(work_dir);
        fs::create_dir_all(&dir)?;

        let file_name = format!("{}.json", self.id);
        let path = dir.join(&file_name);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        let latest_path = dir.join("latest.json");
        #[cfg(unix)]
        {
            use std::os::unix::fs as unix_fs;
            let _ = fs::remove_file(&latest_path);
            // Relative to the link's own directory
            unix_fs::symlink(&file_name, &latest_path)?;
        }
        #[cfg(not(unix))]
        fs::copy(&path, &latest_path)?;

        Ok(path)
    }

    pub fn load(work_dir: &Path, id: &str) -> Result<Self> {
        let path = Self::sessions_dir(work_dir).join(format!("{}.json", id));
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn load_latest(work_dir: &Path) -> Result<Self> {
        let latest_path = Self::sessions_dir(work_dir).join("latest.json");
        if !latest_path.exists() {
            anyhow::bail!("No run recorded under {}", work_dir.display());
        }
        let content = fs::read_to_string(&latest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Session ids, most recent first
    pub fn list_all(work_dir: &Path) -> Result<Vec<String>> {
        let dir = Self::sessions_dir(work_dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != "latest" {
                    sessions.push(stem.to_string());
                }
            }
        }
        sessions.sort();
        sessions.reverse();
        Ok(sessions)
    }

    fn entry(&mut self, name: &str) -> &mut NodeRun {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(NodeRun::pending)
    }

    pub fn register(&mut self, name: &str) {
        self.entry(name);
    }

    pub fn start_node(&mut self, name: &str) {
        let run = self.entry(name);
        run.started = Some(Utc::now());
        run.status = NodeStatus::Running;
    }

    pub fn end_node(
        &mut self,
        name: &str,
        status: NodeStatus,
        commands: Vec<String>,
        error: Option<String>,
    ) {
        let run = self.entry(name);
        run.ended = Some(Utc::now());
        run.status = status;
        run.commands = commands;
        run.error = error;
    }

    pub fn skip_node(&mut self, name: &str) {
        self.entry(name).status = NodeStatus::Skipped;
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Number of nodes in each status
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for run in self.nodes.values() {
            let key = serde_json::to_value(run.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}
