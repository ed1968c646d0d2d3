//! Workflow DAG and its scheduler.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use super::{ExecutableGraph, ExecutionStrategy};
use crate::error::GraphError;

/// A single computational step of a workflow.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    /// Node name, unique within its workflow.
    fn name(&self) -> &str;

    /// Executes the node.
    async fn execute(&self) -> Result<(), GraphError>;
}

/// A named directed acyclic graph of nodes.
pub struct Workflow {
    name: String,
    base_dir: Option<PathBuf>,
    nodes: Vec<Arc<dyn WorkflowNode>>,
    edges: Vec<(String, String)>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("base_dir", &self.base_dir)
            .field("nodes", &self.node_names())
            .finish()
    }
}

impl Workflow {
    /// Creates an empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_dir: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Sets the working directory of the workflow.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Working directory of the workflow, if any.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: impl WorkflowNode + 'static) -> &mut Self {
        self.nodes.push(Arc::new(node));
        self
    }

    /// Declares that `to` runs after `from` completes.
    ///
    /// Unknown node names are accepted here and reported by
    /// [`ExecutableGraph::validate`].
    pub fn connect(&mut self, from: &str, to: &str) -> &mut Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    /// Names of all nodes, in insertion order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the workflow has no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Builds the dependency tables, checking the graph along the way.
    ///
    /// Returns the number of unmet dependencies per node and the
    /// dependents of every node.
    fn dependency_tables(&self) -> Result<(Vec<usize>, Vec<Vec<usize>>), GraphError> {
        if self.name.trim().is_empty() {
            return Err(GraphError::InvalidGraph("workflow name is empty".to_string()));
        }

        if self.nodes.is_empty() {
            return Err(GraphError::InvalidGraph(format!(
                "workflow '{}' has no nodes",
                self.name
            )));
        }

        let mut index = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name(), i).is_some() {
                return Err(GraphError::InvalidGraph(format!(
                    "workflow '{}' has duplicate node '{}'",
                    self.name,
                    node.name()
                )));
            }
        }

        let lookup = |name: &str| {
            index.get(name).copied().ok_or_else(|| {
                GraphError::InvalidGraph(format!(
                    "workflow '{}' connects unknown node '{}'",
                    self.name, name
                ))
            })
        };

        let mut pending = vec![0usize; self.nodes.len()];
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (from, to) in &self.edges {
            let (j, i) = (lookup(from)?, lookup(to)?);
            pending[i] += 1;
            dependents[j].push(i);
        }

        // Kahn's algorithm: every node must be reachable from a root.
        let mut remaining = pending.clone();
        let mut queue: VecDeque<usize> = (0..remaining.len()).filter(|&i| remaining[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = queue.pop_front() {
            visited += 1;
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    queue.push_back(d);
                }
            }
        }
        if visited != self.nodes.len() {
            return Err(GraphError::InvalidGraph(format!(
                "workflow '{}' contains a cycle",
                self.name
            )));
        }

        Ok((pending, dependents))
    }
}

#[async_trait]
impl ExecutableGraph for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), GraphError> {
        self.dependency_tables().map(|_| ())
    }

    async fn run(&self, strategy: ExecutionStrategy) -> Result<(), GraphError> {
        let (mut pending, dependents) = self.dependency_tables()?;
        let limit = strategy.max_workers();
        let start = Instant::now();

        if let Some(dir) = &self.base_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        info!(
            "Running workflow '{}' ({} nodes, {})",
            self.name,
            self.nodes.len(),
            strategy
        );

        let mut ready: VecDeque<usize> = (0..pending.len()).filter(|&i| pending[i] == 0).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut completed = 0;
        let mut failure: Option<GraphError> = None;

        while completed < self.nodes.len() {
            while failure.is_none() && in_flight.len() < limit {
                let Some(i) = ready.pop_front() else { break };
                let node = Arc::clone(&self.nodes[i]);
                debug!("Starting node '{}' of workflow '{}'", node.name(), self.name);
                in_flight.push(async move { (i, node.execute().await) });
            }

            match in_flight.next().await {
                Some((i, Ok(()))) => {
                    completed += 1;
                    debug!(
                        "Node '{}' of workflow '{}' finished",
                        self.nodes[i].name(),
                        self.name
                    );
                    for &d in &dependents[i] {
                        pending[d] -= 1;
                        if pending[d] == 0 {
                            ready.push_back(d);
                        }
                    }
                }
                // Running nodes are awaited; nothing new starts.
                Some((i, Err(e))) => {
                    warn!(
                        "Node '{}' of workflow '{}' failed: {}",
                        self.nodes[i].name(),
                        self.name,
                        e
                    );
                    failure.get_or_insert(e);
                }
                None => {
                    if let Some(e) = failure.take() {
                        return Err(e);
                    }
                    return Err(GraphError::InvalidGraph(format!(
                        "workflow '{}' stalled with {} nodes left",
                        self.name,
                        self.nodes.len() - completed
                    )))
                }
            }
        }

        info!(
            "Workflow '{}' completed in {:.2}s",
            self.name,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingNode {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingNode {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: Arc::clone(log),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                fail: false,
                delay: Duration::from_millis(10),
            }
        }

        fn tracking(mut self, active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            self.active = Arc::clone(active);
            self.peak = Arc::clone(peak);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl WorkflowNode for RecordingNode {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self) -> Result<(), GraphError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(GraphError::NodeFailed {
                    node: self.name.clone(),
                    code: 1,
                    stderr: "failed on purpose".to_string(),
                });
            }
            self.log.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut workflow = Workflow::new("chain");
        workflow
            .add_node(RecordingNode::new("c", &log))
            .add_node(RecordingNode::new("a", &log))
            .add_node(RecordingNode::new("b", &log))
            .connect("a", "b")
            .connect("b", "c");

        workflow.run(ExecutionStrategy::Sequential).await.expect("should run");
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bounded_parallel_respects_limit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut workflow = Workflow::new("fan_out");
        for i in 0..6 {
            workflow.add_node(RecordingNode::new(&format!("n{}", i), &log).tracking(&active, &peak));
        }

        workflow
            .run(ExecutionStrategy::BoundedParallel(2))
            .await
            .expect("should run");
        assert_eq!(log.lock().unwrap().len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_runs_one_at_a_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut workflow = Workflow::new("fan_out");
        for i in 0..4 {
            workflow.add_node(RecordingNode::new(&format!("n{}", i), &log).tracking(&active, &peak));
        }

        workflow.run(ExecutionStrategy::Sequential).await.expect("should run");
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_stops_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut workflow = Workflow::new("broken");
        workflow
            .add_node(RecordingNode::new("first", &log).failing())
            .add_node(RecordingNode::new("second", &log))
            .connect("first", "second");

        let result = workflow.run(ExecutionStrategy::Sequential).await;
        assert!(matches!(result, Err(GraphError::NodeFailed { .. })));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_lets_running_nodes_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut workflow = Workflow::new("siblings");
        workflow
            .add_node(RecordingNode::new("fails", &log).failing())
            .add_node(RecordingNode::new("slow", &log).with_delay(Duration::from_millis(100)))
            .add_node(RecordingNode::new("queued", &log));

        let result = workflow.run(ExecutionStrategy::BoundedParallel(2)).await;
        match result {
            Err(GraphError::NodeFailed { node, .. }) => assert_eq!(node, "fails"),
            other => panic!("expected NodeFailed, got {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec!["slow"]);
    }

    #[test]
    fn test_validate_rejects_empty_workflow() {
        let workflow = Workflow::new("empty");
        assert!(matches!(workflow.validate(), Err(GraphError::InvalidGraph(_))));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut workflow = Workflow::new("cycle");
        workflow
            .add_node(RecordingNode::new("a", &log))
            .add_node(RecordingNode::new("b", &log))
            .connect("a", "b")
            .connect("b", "a");

        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_unknown_nodes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut duplicated = Workflow::new("dup");
        duplicated
            .add_node(RecordingNode::new("a", &log))
            .add_node(RecordingNode::new("a", &log));
        assert!(duplicated.validate().unwrap_err().to_string().contains("duplicate"));

        let mut dangling = Workflow::new("dangling");
        dangling
            .add_node(RecordingNode::new("a", &log))
            .connect("a", "ghost");
        assert!(dangling.validate().unwrap_err().to_string().contains("ghost"));
    }
}
