//! Node scheduler - dependency-driven dispatch over an expanded workflow

use super::Workflow;
use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Lifecycle of a node during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Done,
    Failed,
    /// An upstream node failed
    Skipped,
}

impl NodeStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

/// Tracks which nodes may run next
pub struct Scheduler {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    status: HashMap<String, NodeStatus>,
    running: HashSet<String>,
}

impl Scheduler {
    /// Create a scheduler; fails if the workflow has a cycle
    pub fn new(workflow: &Workflow) -> Result<Self, FlowError> {
        let order = workflow.topological_order()?;
        let dependencies = order
            .iter()
            .map(|name| (name.clone(), workflow.dependencies(name)))
            .collect();
        let status = order
            .iter()
            .map(|name| (name.clone(), NodeStatus::Pending))
            .collect();

        Ok(Self {
            order,
            dependencies,
            status,
            running: HashSet::new(),
        })
    }

    /// Pending nodes whose dependencies are all done, in dependency order
    pub fn schedule_next(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.status(name) == Some(NodeStatus::Pending))
            .filter(|name| {
                self.dependencies[name.as_str()]
                    .iter()
                    .all(|dep| self.status(dep) == Some(NodeStatus::Done))
            })
            .cloned()
            .collect()
    }

    fn set(&mut self, name: &str, status: NodeStatus) -> Result<(), FlowError> {
        let slot = self
            .status
            .get_mut(name)
            .ok_or_else(|| FlowError::UnknownNode(name.to_string()))?;
        *slot = status;
        Ok(())
    }

    pub fn mark_started(&mut self, name: &str) -> Result<(), FlowError> {
        self.set(name, NodeStatus::Running)?;
        self.running.insert(name.to_string());
        Ok(())
    }

    pub fn mark_done(&mut self, name: &str) -> Result<(), FlowError> {
        self.set(name, NodeStatus::Done)?;
        self.running.remove(name);
        Ok(())
    }

    /// Mark a node failed and skip everything that depends on it.
    ///
    /// Returns the names of the skipped nodes.
    pub fn mark_failed(&mut self, name: &str) -> Result<Vec<String>, FlowError> {
        self.set(name, NodeStatus::Failed)?;
        self.running.remove(name);

        let mut blocked: HashSet<String> = HashSet::from([name.to_string()]);
        let mut skipped = Vec::new();
        for node in &self.order {
            let hit = self.dependencies[node.as_str()]
                .iter()
                .any(|dep| blocked.contains(dep));
            if hit && self.status.get(node) == Some(&NodeStatus::Pending) {
                blocked.insert(node.clone());
                skipped.push(node.clone());
            }
        }
        for node in &skipped {
            self.status.insert(node.clone(), NodeStatus::Skipped);
        }
        Ok(skipped)
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.status.get(name).copied()
    }

    pub fn get_running(&self) -> Vec<String> {
        self.running.iter().cloned().collect()
    }

    /// Node names in dispatch order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn all_done(&self) -> bool {
        self.running.is_empty() && self.status.values().all(NodeStatus::is_finished)
    }

    pub fn has_failures(&self) -> bool {
        self.status.values().any(|s| *s == NodeStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;
    use crate::interfaces::IdentityInterface;

    fn diamond() -> Workflow {
        let mut wf = Workflow::new("wf");
        for n in ["a", "b", "c", "d"] {
            wf.add_node(Node::new(n, IdentityInterface::new(&["x", "y"])))
                .unwrap();
        }
        wf.connect("a", "x", "b", "x").unwrap();
        wf.connect("a", "x", "c", "x").unwrap();
        wf.connect("b", "x", "d", "x").unwrap();
        wf.connect("c", "x", "d", "y").unwrap();
        wf
    }

    #[test]
    fn test_schedule_follows_dependencies() {
        let mut sched = Scheduler::new(&diamond()).unwrap();
        assert_eq!(sched.schedule_next(), vec!["a"]);

        sched.mark_started("a").unwrap();
        assert!(sched.schedule_next().is_empty());
        sched.mark_done("a").unwrap();
        assert_eq!(sched.schedule_next(), vec!["b", "c"]);

        for n in ["b", "c"] {
            sched.mark_started(n).unwrap();
            sched.mark_done(n).unwrap();
        }
        assert_eq!(sched.schedule_next(), vec!["d"]);
        sched.mark_started("d").unwrap();
        assert!(!sched.all_done());
        sched.mark_done("d").unwrap();
        assert!(sched.all_done());
        assert!(!sched.has_failures());
    }

    #[test]
    fn test_failure_skips_downstream() {
        let mut sched = Scheduler::new(&diamond()).unwrap();
        sched.mark_started("a").unwrap();
        sched.mark_done("a").unwrap();
        sched.mark_started("b").unwrap();

        let skipped = sched.mark_failed("b").unwrap();
        assert_eq!(skipped, vec!["d"]);
        assert_eq!(sched.status("d"), Some(NodeStatus::Skipped));
        assert_eq!(sched.schedule_next(), vec!["c"]);

        sched.mark_started("c").unwrap();
        sched.mark_done("c").unwrap();
        assert!(sched.all_done());
        assert!(sched.has_failures());
    }

    #[test]
    fn test_unknown_node() {
        let mut sched = Scheduler::new(&diamond()).unwrap();
        assert!(matches!(
            sched.mark_started("zzz"),
            Err(FlowError::UnknownNode(_))
        ));
    }
}
