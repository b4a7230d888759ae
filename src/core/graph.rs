//! Workflow graph - nodes wrapping interfaces, wired by field-level edges

use crate::error::FlowError;
use crate::interfaces::Interface;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named values flowing in and out of a node
pub type Outputs = BTreeMap<String, Value>;

/// Memory hint of a node that does not declare one
pub const DEFAULT_MEM_GB: f64 = 0.2;

/// Inline transform applied to a value while it travels along an edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Number of items in a list
    Len,
    /// Number of items minus one
    Dof,
    /// Sign inversion
    Neg,
    /// Multiply by a constant
    Scale(f64),
}

impl Transform {
    pub fn apply(&self, value: &Value) -> Result<Value, &'static str> {
        match self {
            Self::Len => value
                .as_array()
                .map(|a| Value::from(crate::helpers::len(a)))
                .ok_or("list"),
            Self::Dof => value
                .as_array()
                .map(|a| Value::from(crate::helpers::dof(a)))
                .ok_or("list"),
            Self::Neg => value
                .as_f64()
                .map(|v| Value::from(crate::helpers::neg(v)))
                .ok_or("number"),
            Self::Scale(factor) => value
                .as_f64()
                .map(|v| Value::from(v * factor))
                .ok_or("number"),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Len => write!(f, "len"),
            Self::Dof => write!(f, "dof"),
            Self::Neg => write!(f, "neg"),
            Self::Scale(v) => write!(f, "scale({})", v),
        }
    }
}

/// A unit of work in a workflow
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub interface: Arc<dyn Interface>,
    /// Inputs set when the graph is built
    pub inputs: Outputs,
    pub mem_gb: f64,
    /// Run on the scheduling task instead of a worker thread
    pub run_without_submitting: bool,
    /// Replicate this node and everything downstream once per value
    pub iterables: Option<(String, Vec<Value>)>,
}

impl Node {
    pub fn new(name: impl Into<String>, interface: impl Interface + 'static) -> Self {
        Self {
            name: name.into(),
            interface: Arc::new(interface),
            inputs: Outputs::new(),
            mem_gb: DEFAULT_MEM_GB,
            run_without_submitting: false,
            iterables: None,
        }
    }

    pub fn input(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(field.to_string(), value.into());
        self
    }

    pub fn mem_gb(mut self, mem_gb: f64) -> Self {
        self.mem_gb = mem_gb;
        self
    }

    pub fn run_without_submitting(mut self) -> Self {
        self.run_without_submitting = true;
        self
    }

    pub fn iterables(mut self, field: &str, values: Vec<Value>) -> Self {
        self.iterables = Some((field.to_string(), values));
        self
    }
}

/// Data dependency: `source.source_field` feeds `target.target_field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub source_field: String,
    pub target: String,
    pub target_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

/// A directed acyclic graph of nodes
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), FlowError> {
        if self.node(&node.name).is_some() {
            return Err(FlowError::DuplicateNode(node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Merge another workflow's nodes and edges, prefixing names with `<sub.name>.`
    pub fn add_workflow(&mut self, sub: Workflow) -> Result<(), FlowError> {
        let prefix = sub.name.clone();
        for mut node in sub.nodes {
            node.name = format!("{}.{}", prefix, node.name);
            self.add_node(node)?;
        }
        for mut edge in sub.edges {
            edge.source = format!("{}.{}", prefix, edge.source);
            edge.target = format!("{}.{}", prefix, edge.target);
            self.edges.push(edge);
        }
        Ok(())
    }

    pub fn connect(
        &mut self,
        source: &str,
        source_field: &str,
        target: &str,
        target_field: &str,
    ) -> Result<(), FlowError> {
        self.connect_with(source, source_field, target, target_field, None)
    }

    pub fn connect_with(
        &mut self,
        source: &str,
        source_field: &str,
        target: &str,
        target_field: &str,
        transform: Option<Transform>,
    ) -> Result<(), FlowError> {
        for name in [source, target] {
            if self.node(name).is_none() {
                return Err(FlowError::UnknownNode(name.to_string()));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.target == target && e.target_field == target_field)
        {
            return Err(FlowError::InputConnected {
                node: target.to_string(),
                field: target_field.to_string(),
            });
        }
        self.edges.push(Edge {
            source: source.to_string(),
            source_field: source_field.to_string(),
            target: target.to_string(),
            target_field: target_field.to_string(),
            transform,
        });
        Ok(())
    }

    /// Connect several field pairs between the same two nodes
    pub fn connect_fields(
        &mut self,
        source: &str,
        target: &str,
        fields: &[(&str, &str)],
    ) -> Result<(), FlowError> {
        for (source_field, target_field) in fields {
            self.connect(source, source_field, target, target_field)?;
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Names of the nodes a node reads from, in insertion order
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.target == name) {
            if !deps.contains(&edge.source) {
                deps.push(edge.source.clone());
            }
        }
        deps
    }

    /// Node names in dependency order; ties keep insertion order
    pub fn topological_order(&self) -> Result<Vec<String>, FlowError> {
        let mut indegree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.name.as_str(), 0)).collect();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for edge in &self.edges {
            if seen.insert((edge.source.as_str(), edge.target.as_str())) {
                *indegree.entry(edge.target.as_str()).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .filter(|n| indegree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            let mut released = HashSet::new();
            for edge in self.edges.iter().filter(|e| e.source == name) {
                if !released.insert(edge.target.as_str()) {
                    continue;
                }
                if let Some(d) = indegree.get_mut(edge.target.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.target.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(FlowError::Cycle(self.name.clone()));
        }
        Ok(order)
    }

    /// Nodes reachable from `name`, including itself
    fn downstream(&self, name: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !found.insert(current.clone()) {
                continue;
            }
            for edge in self.edges.iter().filter(|e| e.source == current) {
                stack.push(edge.target.clone());
            }
        }
        found
    }

    /// Replace every iterable node and its downstream subgraph with one copy per value.
    ///
    /// Copies are named `_<field>_<value>/<node>`; nodes upstream of the iterable are shared.
    pub fn expand_iterables(&self) -> Result<Workflow, FlowError> {
        let mut current = self.clone();
        while let Some(idx) = current.nodes.iter().position(|n| n.iterables.is_some()) {
            current = current.expand_one(idx)?;
        }
        current.topological_order()?;
        Ok(current)
    }

    fn expand_one(&self, idx: usize) -> Result<Workflow, FlowError> {
        let iter_node = &self.nodes[idx];
        let (field, values) = iter_node.iterables.clone().unwrap_or_default();
        let downstream = self.downstream(&iter_node.name);

        let mut out = Workflow::new(self.name.clone());
        for node in self.nodes.iter().filter(|n| !downstream.contains(&n.name)) {
            out.nodes.push(node.clone());
        }
        for edge in self.edges.iter().filter(|e| !downstream.contains(&e.target)) {
            out.edges.push(edge.clone());
        }

        for value in &values {
            let prefix = format!("_{}_{}", field, path_safe(value));
            let rename = |name: &str| {
                if downstream.contains(name) {
                    format!("{}/{}", prefix, name)
                } else {
                    name.to_string()
                }
            };

            for node in self.nodes.iter().filter(|n| downstream.contains(&n.name)) {
                let mut copy = node.clone();
                if copy.name == iter_node.name {
                    copy.iterables = None;
                    copy.inputs.insert(field.clone(), value.clone());
                }
                copy.name = rename(&node.name);
                out.add_node(copy)?;
            }
            for edge in self.edges.iter().filter(|e| downstream.contains(&e.target)) {
                let mut copy = edge.clone();
                copy.source = rename(&edge.source);
                copy.target = rename(&edge.target);
                out.edges.push(copy);
            }
        }

        Ok(out)
    }

    /// Static inputs of `name` merged with the upstream values it is wired to
    pub fn resolve_inputs(
        &self,
        name: &str,
        results: &HashMap<String, Outputs>,
    ) -> Result<Outputs, FlowError> {
        let node = self
            .node(name)
            .ok_or_else(|| FlowError::UnknownNode(name.to_string()))?;
        let mut inputs = node.inputs.clone();

        for edge in self.edges.iter().filter(|e| e.target == name) {
            let value = results
                .get(&edge.source)
                .and_then(|o| o.get(&edge.source_field))
                .ok_or_else(|| FlowError::MissingOutput {
                    node: edge.source.clone(),
                    field: edge.source_field.clone(),
                })?;
            let value = match &edge.transform {
                Some(t) => t.apply(value).map_err(|expected| FlowError::InputType {
                    node: name.to_string(),
                    field: edge.target_field.clone(),
                    expected,
                })?,
                None => value.clone(),
            };
            inputs.insert(edge.target_field.clone(), value);
        }

        Ok(inputs)
    }

    /// Working directory of a node under `base`
    pub fn node_dir(&self, base: &Path, name: &str) -> PathBuf {
        base.join(&self.name).join(name.replace('.', "/"))
    }

    /// Serializable description of the graph
    pub fn to_export(&self) -> GraphExport {
        let tasks = self
            .nodes
            .iter()
            .map(|node| {
                let deps = self.dependencies(&node.name);
                let connections = self
                    .edges
                    .iter()
                    .filter(|e| e.target == node.name)
                    .map(|e| match &e.transform {
                        Some(t) => format!("{}.{} -[{}]-> {}", e.source, e.source_field, t, e.target_field),
                        None => format!("{}.{} -> {}", e.source, e.source_field, e.target_field),
                    })
                    .collect();
                (
                    node.name.clone(),
                    TaskExport {
                        task_type: node.interface.kind().to_string(),
                        inputs: node.inputs.clone(),
                        depends_on: (!deps.is_empty()).then_some(deps),
                        connections,
                        mem_gb: node.mem_gb,
                        run_without_submitting: node.run_without_submitting,
                    },
                )
            })
            .collect();

        GraphExport {
            metadata: Metadata {
                project: self.name.clone(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                description: Some(format!("{} nodes, {} edges", self.nodes.len(), self.edges.len())),
            },
            tasks,
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(&self.to_export())?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_export())?)
    }
}

fn path_safe(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub project: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExport {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: Outputs,
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
    pub mem_gb: f64,
    #[serde(default)]
    pub run_without_submitting: bool,
}

/// Exported task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub metadata: Metadata,
    pub tasks: BTreeMap<String, TaskExport>,
}
