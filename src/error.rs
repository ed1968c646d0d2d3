//! Error types for narps-runner operations.
//!
//! Defines error types for each subsystem:
//! - Pipeline runner control plane (team resolution, cohort, scope, dispatch)
//! - Workflow graph execution
//! - Configuration loading
//! - Participant table loading

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the pipeline runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Wrong team ID: '{0}' is not a known team")]
    UnknownTeam(String),

    #[error("Pipeline not implemented for team: {0}")]
    NotImplemented(String),

    #[error("Subject ID '{0}' is not valid")]
    InvalidSubject(String),

    #[error("first_level_only and group_level_only cannot both be requested")]
    InvalidScope,

    #[error("Invalid work unit '{unit}' in {stage} stage: {reason}")]
    InvalidWorkUnit {
        stage: String,
        unit: String,
        reason: String,
    },

    #[error("Execution of '{unit}' failed in {stage} stage: {source}")]
    Execution {
        stage: String,
        unit: String,
        #[source]
        source: GraphError,
    },

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("No team is bound to the runner")]
    NoTeam,

    #[error("Cannot start team {0}: no subjects selected")]
    EmptyCohort(String),

    #[error("Participants error: {0}")]
    Participants(#[from] ParticipantsError),
}

/// Errors raised by workflow graphs while they run.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Failed to spawn node '{node}': {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Node '{node}' exited with code {code}: {stderr}")]
    NodeFailed {
        node: String,
        code: i32,
        stderr: String,
    },

    #[error("Node '{node}' timed out after {timeout:?}")]
    Timeout {
        node: String,
        timeout: std::time::Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading the participant table.
#[derive(Debug, Error)]
pub enum ParticipantsError {
    #[error("Failed to read participants file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Participants file '{0}' has no 'participant_id' column")]
    MissingColumn(PathBuf),

    #[error("Malformed participants row at line {line}: {message}")]
    MalformedRow { line: usize, message: String },
}
