//! Stage dispatch.
//!
//! Stages run strictly one after the other. Inside a list-valued stage the
//! units fan out over at most `parallelism` workers; a single-unit stage
//! hands the parallelism degree to the graph itself.
//!
//! A started unit is never cancelled. When a unit fails, units still waiting
//! for a worker are not started, the running ones are awaited, and the first
//! failure is returned once the whole stage has settled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::sequencer::PlannedStage;
use crate::error::RunnerError;
use crate::pipeline::StageKind;
use crate::workflow::{ExecutableGraph, ExecutionStrategy};

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Stages holding at least one unit of work.
    pub stages_run: usize,
    /// Units of work executed.
    pub units_run: usize,
    /// Wall clock duration, in seconds.
    pub elapsed_secs: f64,
}

/// Runs planned stages with a bounded number of workers.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    parallelism: usize,
}

impl Dispatcher {
    /// Creates a dispatcher. A parallelism of 0 is treated as 1.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs every stage in order, stopping at the first failure.
    pub async fn dispatch(&self, stages: &[PlannedStage]) -> Result<DispatchSummary, RunnerError> {
        let start = Instant::now();
        let mut summary = DispatchSummary::default();

        for planned in stages {
            let units = self.dispatch_stage(planned).await?;
            if units > 0 {
                summary.stages_run += 1;
                summary.units_run += units;
            }
        }

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(summary)
    }

    /// Runs one stage and returns the number of units executed.
    async fn dispatch_stage(&self, planned: &PlannedStage) -> Result<usize, RunnerError> {
        let units = planned.stage.units();
        if units.is_empty() {
            debug!("Skipping {} stage: nothing to run", planned.kind);
            return Ok(0);
        }

        // Nothing runs unless every unit of the stage is executable.
        for unit in units {
            unit.validate().map_err(|e| RunnerError::InvalidWorkUnit {
                stage: planned.kind.to_string(),
                unit: unit.name().to_string(),
                reason: e.to_string(),
            })?;
        }

        let start = Instant::now();
        info!(
            "Starting {} stage ({} units, {} workers)",
            planned.kind,
            units.len(),
            self.parallelism
        );

        if self.parallelism == 1 || units.len() == 1 {
            let strategy = ExecutionStrategy::from_parallelism(self.parallelism);
            for unit in units {
                run_unit(planned.kind, unit, strategy).await?;
            }
        } else {
            let semaphore = Semaphore::new(self.parallelism);
            let failed = AtomicBool::new(false);
            let runs = units.iter().map(|unit| {
                let semaphore = &semaphore;
                let failed = &failed;
                async move {
                    let _permit = semaphore.acquire().await.map_err(|e| {
                        RunnerError::Dispatch(format!("Failed to acquire worker: {}", e))
                    })?;
                    if failed.load(Ordering::SeqCst) {
                        debug!("Not starting '{}': a sibling unit failed", unit.name());
                        return Ok(false);
                    }
                    let result = run_unit(planned.kind, unit, ExecutionStrategy::Sequential).await;
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    result.map(|()| true)
                }
            });

            let results = join_all(runs).await;
            let skipped = results.iter().filter(|r| matches!(r, Ok(false))).count();
            if let Some(err) = results.into_iter().find_map(Result::err) {
                if skipped > 0 {
                    warn!("{} units of the {} stage were not started", skipped, planned.kind);
                }
                return Err(err);
            }
        }

        info!(
            "Finished {} stage in {:.2}s",
            planned.kind,
            start.elapsed().as_secs_f64()
        );
        Ok(units.len())
    }
}

async fn run_unit(
    kind: StageKind,
    unit: &Arc<dyn ExecutableGraph>,
    strategy: ExecutionStrategy,
) -> Result<(), RunnerError> {
    debug!("Running '{}' ({}) in {} stage", unit.name(), strategy, kind);
    unit.run(strategy)
        .await
        .map_err(|source| RunnerError::Execution {
            stage: kind.to_string(),
            unit: unit.name().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::pipeline::Stage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Probe {
        log: Arc<Mutex<Vec<(String, ExecutionStrategy)>>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct FakeGraph {
        name: String,
        probe: Probe,
        valid: bool,
        fail: bool,
        delay: Duration,
    }

    impl FakeGraph {
        fn new(name: &str, probe: &Probe) -> Self {
            Self {
                name: name.to_string(),
                probe: probe.clone(),
                valid: true,
                fail: false,
                delay: Duration::from_millis(20),
            }
        }
    }

    #[async_trait]
    impl ExecutableGraph for FakeGraph {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate(&self) -> Result<(), GraphError> {
            if self.valid {
                Ok(())
            } else {
                Err(GraphError::InvalidGraph("not a workflow".to_string()))
            }
        }

        async fn run(&self, strategy: ExecutionStrategy) -> Result<(), GraphError> {
            let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.probe.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(GraphError::NodeFailed {
                    node: self.name.clone(),
                    code: 1,
                    stderr: String::new(),
                });
            }
            self.probe.log.lock().unwrap().push((self.name.clone(), strategy));
            Ok(())
        }
    }

    fn planned(kind: StageKind, stage: Stage) -> PlannedStage {
        PlannedStage { kind, stage }
    }

    fn ran(probe: &Probe) -> Vec<String> {
        probe.log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_skip_empty() {
        let probe = Probe::default();
        let stages = vec![
            planned(StageKind::Preprocessing, Stage::Empty),
            planned(StageKind::RunLevel, Stage::single(FakeGraph::new("run", &probe))),
            planned(StageKind::SubjectLevel, Stage::single(FakeGraph::new("subject", &probe))),
            planned(StageKind::GroupLevel, Stage::single(FakeGraph::new("group", &probe))),
        ];

        let summary = Dispatcher::new(1).dispatch(&stages).await.expect("should run");
        assert_eq!(ran(&probe), vec!["run", "subject", "group"]);
        assert_eq!(summary.stages_run, 3);
        assert_eq!(summary.units_run, 3);
    }

    #[tokio::test]
    async fn test_sequential_when_parallelism_is_one() {
        let probe = Probe::default();
        let stages = vec![planned(
            StageKind::GroupLevel,
            Stage::many(["a", "b", "c"].map(|n| FakeGraph::new(n, &probe))),
        )];

        Dispatcher::new(1).dispatch(&stages).await.expect("should run");
        assert_eq!(ran(&probe), vec!["a", "b", "c"]);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
        assert!(probe
            .log
            .lock()
            .unwrap()
            .iter()
            .all(|(_, s)| *s == ExecutionStrategy::Sequential));
    }

    #[tokio::test]
    async fn test_list_stage_fans_out_within_bound() {
        let probe = Probe::default();
        let stages = vec![planned(
            StageKind::GroupLevel,
            Stage::many(["a", "b", "c", "d", "e"].map(|n| FakeGraph::new(n, &probe))),
        )];

        Dispatcher::new(2).dispatch(&stages).await.expect("should run");
        assert_eq!(ran(&probe).len(), 5);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_unit_receives_parallelism() {
        let probe = Probe::default();
        let stages = vec![planned(
            StageKind::SubjectLevel,
            Stage::single(FakeGraph::new("l1", &probe)),
        )];

        Dispatcher::new(4).dispatch(&stages).await.expect("should run");
        assert_eq!(
            probe.log.lock().unwrap()[0].1,
            ExecutionStrategy::BoundedParallel(4)
        );
    }

    #[tokio::test]
    async fn test_invalid_unit_prevents_stage_execution() {
        let probe = Probe::default();
        let mut broken = FakeGraph::new("broken", &probe);
        broken.valid = false;

        let stages = vec![planned(
            StageKind::GroupLevel,
            Stage::Many(vec![
                Arc::new(FakeGraph::new("ok", &probe)) as Arc<dyn ExecutableGraph>,
                Arc::new(broken),
            ]),
        )];

        match Dispatcher::new(2).dispatch(&stages).await {
            Err(RunnerError::InvalidWorkUnit { stage, unit, .. }) => {
                assert_eq!(stage, "group level");
                assert_eq!(unit, "broken");
            }
            other => panic!("expected InvalidWorkUnit, got {:?}", other),
        }
        assert!(ran(&probe).is_empty());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_stages() {
        let probe = Probe::default();
        let mut failing = FakeGraph::new("l1", &probe);
        failing.fail = true;

        let stages = vec![
            planned(StageKind::SubjectLevel, Stage::single(failing)),
            planned(StageKind::GroupLevel, Stage::single(FakeGraph::new("l2", &probe))),
        ];

        let result = Dispatcher::new(1).dispatch(&stages).await;
        assert!(matches!(result, Err(RunnerError::Execution { .. })));
        assert!(ran(&probe).is_empty());
    }

    #[tokio::test]
    async fn test_failure_waits_for_running_siblings() {
        let probe = Probe::default();
        let mut failing = FakeGraph::new("fast", &probe);
        failing.fail = true;
        failing.delay = Duration::from_millis(5);
        let mut slow = FakeGraph::new("slow", &probe);
        slow.delay = Duration::from_millis(200);

        let stages = vec![planned(
            StageKind::GroupLevel,
            Stage::Many(vec![
                Arc::new(failing) as Arc<dyn ExecutableGraph>,
                Arc::new(slow),
            ]),
        )];

        let result = Dispatcher::new(2).dispatch(&stages).await;
        match result {
            Err(RunnerError::Execution { unit, .. }) => assert_eq!(unit, "fast"),
            other => panic!("expected Execution error, got {:?}", other),
        }
        // The slow unit completed before dispatch returned.
        assert_eq!(ran(&probe), vec!["slow"]);
        assert_eq!(probe.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_skips_queued_units() {
        let probe = Probe::default();
        let mut failing = FakeGraph::new("first", &probe);
        failing.fail = true;
        let mut running = FakeGraph::new("running", &probe);
        running.delay = Duration::from_millis(80);

        let stages = vec![planned(
            StageKind::GroupLevel,
            Stage::Many(vec![
                Arc::new(failing) as Arc<dyn ExecutableGraph>,
                Arc::new(running),
                Arc::new(FakeGraph::new("queued", &probe)),
            ]),
        )];

        let result = Dispatcher::new(2).dispatch(&stages).await;
        assert!(matches!(result, Err(RunnerError::Execution { .. })));
        assert_eq!(ran(&probe), vec!["running"]);
    }

    #[test]
    fn test_zero_parallelism_is_clamped() {
        assert_eq!(Dispatcher::new(0).parallelism(), 1);
    }
}
