//! featflow - FSL task-fMRI analysis pipelines as task graphs
//!
//! First-level (per-subject GLM) and second-level (group mixed-effects with FWE and
//! cluster-extent thresholding) pipelines are built as [`core::Workflow`]s whose nodes
//! wrap FSL command-line tools, and run by a small local scheduler.

pub mod app;
pub mod bids;
pub mod config;
pub mod core;
pub mod error;
pub mod helpers;
pub mod interfaces;
pub mod model;
pub mod pipelines;
pub mod session;

// Re-exports
pub use app::{App, RunReport};
pub use config::{AnalysisConfig, ExecutionConfig};
pub use core::{Executor, Node, Scheduler, TaskEvent, Workflow};
pub use error::FlowError;
pub use pipelines::{first_level_wf, second_level_wf, susan_smooth_wf};
pub use session::{NodeRun, Session};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
