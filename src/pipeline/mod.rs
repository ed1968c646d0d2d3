//! Pluggable analysis pipelines.
//!
//! Every NARPS team ships its own analysis pipeline. The runner does not
//! know anything about the analysis itself: it only talks to the
//! [`Pipeline`] contract defined here.
//!
//! # Architecture
//!
//! - **Pipeline**: one implementation per team key, owning the cohort and
//!   the directory layout, producing one [`Stage`] per [`StageKind`] and
//!   declaring the files each level is expected to write
//! - **Registry**: static table mapping team keys to pipeline factories
//! - **Stage**: the realized form of one phase of computation, either
//!   nothing, a single workflow or a list of workflows
//!
//! # Example
//!
//! ```rust,ignore
//! use narps_runner::pipeline::{PipelineRegistry, StageKind};
//!
//! let mut pipeline = PipelineRegistry::builtin().resolve("2T6S")?;
//! pipeline.directories_mut().set_output_dir_with_team_id("2T6S");
//!
//! let stage = pipeline.stage(StageKind::SubjectLevel);
//! println!("{} units in the subject level stage", stage.len());
//! ```

pub mod registry;
pub mod team_2t6s;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::participants::SubjectId;
use crate::workflow::ExecutableGraph;

pub use registry::{PipelineFactory, PipelineRegistry};
pub use team_2t6s::PipelineTeam2T6S;

/// Directory layout of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDirectories {
    /// Root of the input dataset.
    pub dataset_dir: PathBuf,
    /// Root under which reproduced results of all teams are written.
    pub results_dir: PathBuf,
    /// Team specific output directory.
    pub output_dir: PathBuf,
    /// Team specific directory for intermediate files.
    pub working_dir: PathBuf,
}

impl PipelineDirectories {
    /// Creates a layout from the dataset and results roots.
    pub fn new(dataset_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            results_dir: results_dir.into(),
            ..Self::default()
        }
    }

    /// Name of the reproduced results directory of a team.
    pub fn team_output_dirname(team_id: &str) -> String {
        format!("NARPS-{}-reproduced", team_id)
    }

    /// Sets `output_dir` to `results_dir/NARPS-<team>-reproduced`.
    pub fn set_output_dir_with_team_id(&mut self, team_id: &str) {
        self.output_dir = self.results_dir.join(Self::team_output_dirname(team_id));
    }

    /// Sets `working_dir` to the `intermediate_results` directory of the
    /// team output directory.
    pub fn set_working_dir_with_team_id(&mut self, team_id: &str) {
        self.working_dir = self
            .results_dir
            .join(Self::team_output_dirname(team_id))
            .join("intermediate_results");
    }
}

/// A phase of computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocessing,
    RunLevel,
    SubjectLevel,
    GroupLevel,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Preprocessing,
        StageKind::RunLevel,
        StageKind::SubjectLevel,
        StageKind::GroupLevel,
    ];

    /// Returns true for the stages making up the first level.
    pub fn is_first_level(&self) -> bool {
        !matches!(self, StageKind::GroupLevel)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Preprocessing => "preprocessing",
            StageKind::RunLevel => "run level",
            StageKind::SubjectLevel => "subject level",
            StageKind::GroupLevel => "group level",
        };
        f.write_str(name)
    }
}

/// Which stages a run or an audit targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionScope {
    /// Every stage.
    #[default]
    Full,
    /// Preprocessing, run level and subject level.
    FirstLevel,
    /// Group level only.
    GroupLevel,
}

impl ExecutionScope {
    /// Builds a scope from the two exclusive command-line flags.
    pub fn from_flags(first_level_only: bool, group_level_only: bool) -> Result<Self, RunnerError> {
        match (first_level_only, group_level_only) {
            (true, true) => Err(RunnerError::InvalidScope),
            (true, false) => Ok(Self::FirstLevel),
            (false, true) => Ok(Self::GroupLevel),
            (false, false) => Ok(Self::Full),
        }
    }

    /// Returns true if first level stages are part of the scope.
    pub fn includes_first_level(&self) -> bool {
        !matches!(self, Self::GroupLevel)
    }

    /// Returns true if the group level stage is part of the scope.
    pub fn includes_group_level(&self) -> bool {
        !matches!(self, Self::FirstLevel)
    }

    /// Returns true if `kind` belongs to the scope.
    pub fn includes(&self, kind: StageKind) -> bool {
        if kind.is_first_level() {
            self.includes_first_level()
        } else {
            self.includes_group_level()
        }
    }
}

impl fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::FirstLevel => write!(f, "first level"),
            Self::GroupLevel => write!(f, "group level"),
        }
    }
}

/// Realized form of a stage.
#[derive(Clone, Default)]
pub enum Stage {
    /// The stage does not apply to this pipeline.
    #[default]
    Empty,
    /// One unit of work.
    Single(Arc<dyn ExecutableGraph>),
    /// Several independent units of work.
    Many(Vec<Arc<dyn ExecutableGraph>>),
}

impl Stage {
    /// Wraps a single graph.
    pub fn single(graph: impl ExecutableGraph + 'static) -> Self {
        Self::Single(Arc::new(graph))
    }

    /// Wraps a list of graphs.
    pub fn many<I, G>(graphs: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: ExecutableGraph + 'static,
    {
        Self::Many(
            graphs
                .into_iter()
                .map(|g| Arc::new(g) as Arc<dyn ExecutableGraph>)
                .collect(),
        )
    }

    /// Units of work of the stage.
    pub fn units(&self) -> &[Arc<dyn ExecutableGraph>] {
        match self {
            Self::Empty => &[],
            Self::Single(graph) => std::slice::from_ref(graph),
            Self::Many(graphs) => graphs,
        }
    }

    /// Number of units of work.
    pub fn len(&self) -> usize {
        self.units().len()
    }

    /// Returns true if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.units().is_empty()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.units().iter().map(|g| g.name()).collect();
        match self {
            Self::Empty => write!(f, "Stage::Empty"),
            Self::Single(_) => f.debug_tuple("Stage::Single").field(&names[0]).finish(),
            Self::Many(_) => f.debug_tuple("Stage::Many").field(&names).finish(),
        }
    }
}

/// Contract implemented by every team pipeline.
pub trait Pipeline: Send + Sync {
    /// Team key the pipeline reproduces.
    fn team_id(&self) -> &str;

    /// Directory layout.
    fn directories(&self) -> &PipelineDirectories;

    /// Mutable directory layout.
    fn directories_mut(&mut self) -> &mut PipelineDirectories;

    /// Current cohort.
    fn subject_list(&self) -> &[SubjectId];

    /// Replaces the cohort.
    fn set_subject_list(&mut self, subjects: Vec<SubjectId>);

    fn preprocessing(&self) -> Stage {
        Stage::Empty
    }

    fn run_level_analysis(&self) -> Stage {
        Stage::Empty
    }

    fn subject_level_analysis(&self) -> Stage;

    fn group_level_analysis(&self) -> Stage;

    fn preprocessing_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn run_level_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn subject_level_outputs(&self) -> Vec<PathBuf>;

    fn group_level_outputs(&self) -> Vec<PathBuf>;

    /// Thresholded and unthresholded maps reported for each hypothesis.
    fn hypotheses_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Realizes the stage of the given kind.
    fn stage(&self, kind: StageKind) -> Stage {
        match kind {
            StageKind::Preprocessing => self.preprocessing(),
            StageKind::RunLevel => self.run_level_analysis(),
            StageKind::SubjectLevel => self.subject_level_analysis(),
            StageKind::GroupLevel => self.group_level_analysis(),
        }
    }

    /// Expected outputs of preprocessing, run level and subject level.
    fn first_level_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = self.preprocessing_outputs();
        outputs.extend(self.run_level_outputs());
        outputs.extend(self.subject_level_outputs());
        outputs
    }
}

/// Joins a relative output path template under `root`.
pub(crate) fn under(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::workflow::ExecutionStrategy;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl ExecutableGraph for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn validate(&self) -> Result<(), GraphError> {
            Ok(())
        }

        async fn run(&self, _strategy: ExecutionStrategy) -> Result<(), GraphError> {
            Ok(())
        }
    }

    #[test]
    fn test_scope_from_flags() {
        assert_eq!(ExecutionScope::from_flags(false, false).unwrap(), ExecutionScope::Full);
        assert_eq!(
            ExecutionScope::from_flags(true, false).unwrap(),
            ExecutionScope::FirstLevel
        );
        assert_eq!(
            ExecutionScope::from_flags(false, true).unwrap(),
            ExecutionScope::GroupLevel
        );
        assert!(matches!(
            ExecutionScope::from_flags(true, true),
            Err(RunnerError::InvalidScope)
        ));
    }

    #[test]
    fn test_scope_membership() {
        assert!(ExecutionScope::Full.includes(StageKind::Preprocessing));
        assert!(ExecutionScope::Full.includes(StageKind::GroupLevel));
        assert!(ExecutionScope::FirstLevel.includes(StageKind::SubjectLevel));
        assert!(!ExecutionScope::FirstLevel.includes(StageKind::GroupLevel));
        assert!(!ExecutionScope::GroupLevel.includes(StageKind::RunLevel));
        assert!(ExecutionScope::GroupLevel.includes(StageKind::GroupLevel));
    }

    #[test]
    fn test_stage_units() {
        assert!(Stage::Empty.is_empty());
        assert!(Stage::Many(Vec::new()).is_empty());

        let single = Stage::single(Named("l1"));
        assert_eq!(single.len(), 1);
        assert_eq!(single.units()[0].name(), "l1");

        let many = Stage::many([Named("a"), Named("b")]);
        let names: Vec<&str> = many.units().iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(format!("{:?}", many), "Stage::Many([\"a\", \"b\"])");
    }

    #[test]
    fn test_directories_with_team_id() {
        let mut dirs = PipelineDirectories::new("/data/ds001734", "/results");
        dirs.set_output_dir_with_team_id("2T6S");
        dirs.set_working_dir_with_team_id("2T6S");

        assert_eq!(dirs.output_dir, PathBuf::from("/results/NARPS-2T6S-reproduced"));
        assert_eq!(
            dirs.working_dir,
            PathBuf::from("/results/NARPS-2T6S-reproduced/intermediate_results")
        );
        assert_eq!(dirs.dataset_dir, PathBuf::from("/data/ds001734"));
    }

    #[test]
    fn test_stage_kind_order() {
        assert_eq!(StageKind::ALL[0], StageKind::Preprocessing);
        assert_eq!(StageKind::ALL[3], StageKind::GroupLevel);
        assert_eq!(StageKind::RunLevel.to_string(), "run level");
        assert!(!StageKind::GroupLevel.is_first_level());
    }
}
