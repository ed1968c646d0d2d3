//! Stage sequencing.

use crate::pipeline::{ExecutionScope, Pipeline, Stage, StageKind};

/// A stage realized by a pipeline, tagged with its kind.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub kind: StageKind,
    pub stage: Stage,
}

/// Realizes the stages of `pipeline` that belong to `scope`, in execution
/// order. Stages that do not apply are kept as [`Stage::Empty`].
pub fn assemble(pipeline: &dyn Pipeline, scope: ExecutionScope) -> Vec<PlannedStage> {
    StageKind::ALL
        .into_iter()
        .filter(|kind| scope.includes(*kind))
        .map(|kind| PlannedStage {
            kind,
            stage: pipeline.stage(kind),
        })
        .collect()
}
