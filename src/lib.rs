//! narps-runner: control plane for the NARPS open pipelines.
//!
//! This library resolves a team key to its analysis pipeline, selects the
//! subject cohort, runs the pipeline stages with bounded parallelism and
//! reports which expected outputs are missing.

// Core modules
pub mod cli;
pub mod cohort;
pub mod config;
pub mod error;
pub mod participants;
pub mod pipeline;
pub mod runner;
pub mod workflow;

// Re-export commonly used types
pub use error::{ConfigError, GraphError, ParticipantsError, RunnerError};
pub use pipeline::{ExecutionScope, Pipeline, PipelineRegistry, Stage, StageKind};
pub use runner::{OutputAudit, PipelineRunner};
