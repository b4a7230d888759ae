//! Core engine - workflow graph, command running, node scheduling

mod executor;
mod graph;
pub mod runner;
mod scheduler;

pub use executor::{Executor, Job, TaskEvent};
pub use graph::{
    Edge, GraphExport, Metadata, Node, Outputs, TaskExport, Transform, Workflow, DEFAULT_MEM_GB,
};
pub use scheduler::{NodeStatus, Scheduler};
