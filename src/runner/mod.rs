//! Pipeline runner.
//!
//! The runner is the control plane around a team pipeline: it binds a team,
//! selects the cohort, runs the requested stages and reports which expected
//! outputs are still missing.
//!
//! # Architecture
//!
//! ```text
//! team key → Registry → Pipeline ← Cohort resolver
//!                          │
//!                      Sequencer → Dispatcher → ExecutableGraph::run
//!                          │
//!                       Auditor → OutputAudit
//! ```
//!
//! The runner moves through three states: `Uninitialized` (no team),
//! `TeamBound` (pipeline built, empty cohort) and `Ready` (non-empty cohort).
//! Binding another team replaces the pipeline and its cohort.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use narps_runner::participants::ParticipantTable;
//! use narps_runner::pipeline::ExecutionScope;
//! use narps_runner::runner::PipelineRunner;
//!
//! let participants = ParticipantTable::from_dataset("data/original/ds001734")?;
//! let mut runner = PipelineRunner::new(Arc::new(participants)).with_nb_procs(4);
//!
//! runner.assign_team("2T6S")?;
//! runner.configure_directories("data/original/ds001734", "data/results/reproduced")?;
//! runner.select_subjects(&["1", "2", "3"])?;
//!
//! runner.start(ExecutionScope::Full).await?;
//! let audit = runner.missing_outputs(ExecutionScope::Full)?;
//! println!("{} files missing", audit.missing_count());
//! ```

pub mod audit;
pub mod dispatcher;
pub mod sequencer;

pub use audit::{missing_files, OutputAudit};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use sequencer::{assemble, PlannedStage};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cohort::{self, CohortSelection};
use crate::config::Configuration;
use crate::error::RunnerError;
use crate::participants::{ParticipantRegistry, SubjectId};
use crate::pipeline::{ExecutionScope, Pipeline, PipelineRegistry};

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Uninitialized,
    TeamBound,
    Ready,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::TeamBound => write!(f, "team bound"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Runs a team pipeline over a cohort of subjects.
pub struct PipelineRunner {
    registry: Arc<PipelineRegistry>,
    participants: Arc<dyn ParticipantRegistry>,
    pipeline: Option<Box<dyn Pipeline>>,
    nb_procs: usize,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("team_id", &self.team_id())
            .field("subjects", &self.subjects())
            .field("nb_procs", &self.nb_procs)
            .finish()
    }
}

impl PipelineRunner {
    /// Creates a runner over the built-in team registry.
    pub fn new(participants: Arc<dyn ParticipantRegistry>) -> Self {
        Self::with_shared_registry(PipelineRegistry::shared(), participants)
    }

    /// Creates a runner over a custom team registry.
    pub fn with_registry(registry: PipelineRegistry, participants: Arc<dyn ParticipantRegistry>) -> Self {
        Self::with_shared_registry(Arc::new(registry), participants)
    }

    /// Creates a runner over a registry shared with other runners.
    pub fn with_shared_registry(
        registry: Arc<PipelineRegistry>,
        participants: Arc<dyn ParticipantRegistry>,
    ) -> Self {
        Self {
            registry,
            participants,
            pipeline: None,
            nb_procs: 1,
        }
    }

    /// Creates a runner using the parallelism of `config`.
    pub fn from_configuration(config: &Configuration, participants: Arc<dyn ParticipantRegistry>) -> Self {
        Self::new(participants).with_nb_procs(config.runner.nb_procs)
    }

    /// Builder method to set the number of parallel workers.
    pub fn with_nb_procs(mut self, nb_procs: usize) -> Self {
        self.nb_procs = nb_procs.max(1);
        self
    }

    pub fn nb_procs(&self) -> usize {
        self.nb_procs
    }

    pub fn state(&self) -> RunnerState {
        match &self.pipeline {
            None => RunnerState::Uninitialized,
            Some(p) if p.subject_list().is_empty() => RunnerState::TeamBound,
            Some(_) => RunnerState::Ready,
        }
    }

    /// Key of the bound team.
    pub fn team_id(&self) -> Option<&str> {
        self.pipeline.as_deref().map(|p| p.team_id())
    }

    /// The bound pipeline.
    pub fn pipeline(&self) -> Option<&dyn Pipeline> {
        self.pipeline.as_deref()
    }

    /// Current cohort, empty when no team is bound.
    pub fn subjects(&self) -> &[SubjectId] {
        self.pipeline.as_deref().map_or(&[], |p| p.subject_list())
    }

    /// Binds a team, replacing any previous pipeline and cohort.
    ///
    /// On failure the runner is left without a team.
    pub fn assign_team(&mut self, team_id: &str) -> Result<(), RunnerError> {
        match self.registry.resolve(team_id) {
            Ok(pipeline) => {
                info!("Bound team {}", team_id);
                self.pipeline = Some(pipeline);
                Ok(())
            }
            Err(e) => {
                self.pipeline = None;
                Err(e)
            }
        }
    }

    /// Sets the dataset and results roots and derives the team directories.
    pub fn configure_directories(
        &mut self,
        dataset_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
    ) -> Result<(), RunnerError> {
        let pipeline = self.pipeline_mut()?;
        let team_id = pipeline.team_id().to_string();
        let directories = pipeline.directories_mut();
        directories.dataset_dir = dataset_dir.into();
        directories.results_dir = results_dir.into();
        directories.set_output_dir_with_team_id(&team_id);
        directories.set_working_dir_with_team_id(&team_id);
        Ok(())
    }

    /// Applies the directory roots of `config`.
    pub fn apply_configuration(&mut self, config: &Configuration) -> Result<(), RunnerError> {
        self.configure_directories(
            &config.directories.dataset,
            &config.directories.reproduced_results,
        )
    }

    /// Replaces the cohort with explicit subjects.
    ///
    /// On error the previous cohort is kept.
    pub fn select_subjects<S: AsRef<str>>(&mut self, raw_ids: &[S]) -> Result<(), RunnerError> {
        self.pipeline_ref()?;
        let subjects = cohort::resolve_explicit(self.participants.as_ref(), raw_ids)?;
        self.set_cohort(subjects)
    }

    /// Replaces the cohort with `count` random draws from the team pool.
    pub fn select_random(&mut self, count: usize) -> Result<(), RunnerError> {
        self.select_random_with(count, &mut rand::rng())
    }

    /// Same as [`select_random`](Self::select_random) with a caller supplied RNG.
    pub fn select_random_with<R>(&mut self, count: usize, rng: &mut R) -> Result<(), RunnerError>
    where
        R: rand::Rng + ?Sized,
    {
        let team_id = self.pipeline_ref()?.team_id().to_string();
        let subjects = cohort::resolve_random(self.participants.as_ref(), &team_id, count, rng);
        self.set_cohort(subjects)
    }

    /// Replaces the cohort with the deterministic subset of `count` subjects.
    pub fn select_subset(&mut self, count: usize) -> Result<(), RunnerError> {
        self.pipeline_ref()?;
        let subjects = cohort::resolve_subset(self.participants.as_ref(), count);
        self.set_cohort(subjects)
    }

    /// Applies any of the three selection modes.
    pub fn select(&mut self, selection: &CohortSelection) -> Result<(), RunnerError> {
        match selection {
            CohortSelection::Explicit(ids) => self.select_subjects(ids),
            CohortSelection::Random(count) => self.select_random(*count),
            CohortSelection::Subset(count) => self.select_subset(*count),
        }
    }

    /// Runs the stages of `scope` and waits for all of them to finish.
    ///
    /// Outputs written by stages that completed before a failure are kept.
    pub async fn start(&self, scope: ExecutionScope) -> Result<DispatchSummary, RunnerError> {
        let pipeline = self.pipeline_ref()?;
        if pipeline.subject_list().is_empty() {
            return Err(RunnerError::EmptyCohort(pipeline.team_id().to_string()));
        }

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            team = pipeline.team_id(),
            subjects = pipeline.subject_list().len(),
            nb_procs = self.nb_procs,
            "Starting {} run",
            scope
        );

        let stages = sequencer::assemble(pipeline, scope);
        match Dispatcher::new(self.nb_procs).dispatch(&stages).await {
            Ok(summary) => {
                info!(
                    run_id = %run_id,
                    "Run finished: {} stages, {} units in {:.2}s",
                    summary.stages_run,
                    summary.units_run,
                    summary.elapsed_secs
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(run_id = %run_id, "Run failed: {}", e);
                Err(e)
            }
        }
    }

    /// Same as [`start`](Self::start), with the scope given as the two
    /// exclusive flags. Fails before anything runs if both are set.
    pub async fn start_with_flags(
        &self,
        first_level_only: bool,
        group_level_only: bool,
    ) -> Result<DispatchSummary, RunnerError> {
        let scope = ExecutionScope::from_flags(first_level_only, group_level_only)?;
        self.start(scope).await
    }

    /// Expected preprocessing, run level and subject level files that are missing.
    pub fn missing_first_level_outputs(&self) -> Result<Vec<PathBuf>, RunnerError> {
        Ok(missing_files(self.pipeline_ref()?.first_level_outputs()))
    }

    /// Expected group level files that are missing.
    pub fn missing_group_level_outputs(&self) -> Result<Vec<PathBuf>, RunnerError> {
        Ok(missing_files(self.pipeline_ref()?.group_level_outputs()))
    }

    /// Audits the expected outputs of `scope`.
    pub fn missing_outputs(&self, scope: ExecutionScope) -> Result<OutputAudit, RunnerError> {
        let pipeline = self.pipeline_ref()?;

        let first_level = scope
            .includes_first_level()
            .then(|| missing_files(pipeline.first_level_outputs()));
        let group_level = scope
            .includes_group_level()
            .then(|| missing_files(pipeline.group_level_outputs()));

        Ok(OutputAudit {
            team_id: pipeline.team_id().to_string(),
            subjects: pipeline.subject_list().to_vec(),
            scope,
            first_level,
            group_level,
            checked_at: Utc::now(),
        })
    }

    /// Expected hypothesis maps that are missing.
    pub fn missing_hypotheses_outputs(&self) -> Result<Vec<PathBuf>, RunnerError> {
        Ok(missing_files(self.pipeline_ref()?.hypotheses_outputs()))
    }

    /// Output directory of the bound team.
    pub fn output_dir(&self) -> Option<&Path> {
        self.pipeline
            .as_deref()
            .map(|p| p.directories().output_dir.as_path())
    }

    fn set_cohort(&mut self, subjects: Vec<SubjectId>) -> Result<(), RunnerError> {
        let pipeline = self.pipeline_mut()?;
        info!(
            "Selected {} subjects for team {}",
            subjects.len(),
            pipeline.team_id()
        );
        pipeline.set_subject_list(subjects);
        Ok(())
    }

    fn pipeline_ref(&self) -> Result<&dyn Pipeline, RunnerError> {
        self.pipeline.as_deref().ok_or(RunnerError::NoTeam)
    }

    fn pipeline_mut(&mut self) -> Result<&mut (dyn Pipeline + 'static), RunnerError> {
        self.pipeline.as_deref_mut().ok_or(RunnerError::NoTeam)
    }
}
