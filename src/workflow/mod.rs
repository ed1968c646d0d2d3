//! Executable workflow graphs.
//!
//! A unit of work handed to the dispatcher is anything implementing
//! [`ExecutableGraph`]: it can check that it is well formed and it can run
//! itself with a given [`ExecutionStrategy`].
//!
//! This module also ships the graph engine used by the built-in team
//! pipelines:
//!
//! - **Workflow**: a named DAG of nodes with dependency edges, executed in
//!   dependency order with a bounded number of nodes in flight
//! - **CommandNode**: a node running an external program
//!
//! # Example
//!
//! ```rust,ignore
//! use narps_runner::workflow::{CommandNode, ExecutableGraph, ExecutionStrategy, Workflow};
//!
//! let mut workflow = Workflow::new("subject_level_analysis");
//! workflow
//!     .add_node(CommandNode::new("specify", "matlab").with_arg("-batch"))
//!     .add_node(CommandNode::new("estimate", "matlab").with_arg("-batch"))
//!     .connect("specify", "estimate");
//!
//! workflow.run(ExecutionStrategy::BoundedParallel(4)).await?;
//! ```

pub mod command;
pub mod graph;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

pub use command::CommandNode;
pub use graph::{Workflow, WorkflowNode};

/// How a graph should schedule its own nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One node at a time.
    Sequential,
    /// At most `n` nodes at a time.
    BoundedParallel(usize),
}

impl ExecutionStrategy {
    /// Picks the strategy matching a parallelism degree.
    pub fn from_parallelism(parallelism: usize) -> Self {
        if parallelism > 1 {
            Self::BoundedParallel(parallelism)
        } else {
            Self::Sequential
        }
    }

    /// Maximum number of nodes allowed in flight (never zero).
    pub fn max_workers(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::BoundedParallel(n) => (*n).max(1),
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::BoundedParallel(n) => write!(f, "bounded-parallel({})", n),
        }
    }
}

/// An opaque, externally executable computational graph.
#[async_trait]
pub trait ExecutableGraph: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Checks that the graph can be executed at all.
    fn validate(&self) -> Result<(), GraphError>;

    /// Runs the graph to completion.
    async fn run(&self, strategy: ExecutionStrategy) -> Result<(), GraphError>;
}
