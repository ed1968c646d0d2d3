//! Static team registry.
//!
//! Maps every known team key to the factory building its pipeline. Keys of
//! teams whose pipeline has not been reproduced yet are still registered,
//! without a factory, so that they can be told apart from typos.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::debug;

use super::{Pipeline, PipelineTeam2T6S};
use crate::error::RunnerError;

/// Builds a fresh pipeline with no cohort and default directories.
pub type PipelineFactory = fn() -> Box<dyn Pipeline>;

/// Keys of all teams that took part in NARPS.
pub const NARPS_TEAMS: [&str; 70] = [
    "08MQ", "0C7Q", "0ED6", "0H5E", "0I4U", "0JO0", "16IN", "1K0E", "1KB2", "1P0Y", "27SS",
    "2T6S", "2T7P", "3C6G", "3PQ2", "3TR7", "43FJ", "46CD", "4SZ2", "4TQ6", "50GV", "51PW",
    "5G9K", "6FH5", "6VV2", "80GC", "94GU", "98BT", "9Q6R", "9T8E", "9U7M", "AO86", "B23O",
    "B5I6", "C22U", "C88N", "DC61", "E3B6", "E6R3", "I07H", "I52Y", "I9D6", "IZ20", "J7F9",
    "K9P0", "L1A8", "L3V8", "L7J7", "L9G5", "O03M", "O21U", "O6R6", "P5F3", "Q58J", "Q6O0",
    "R42Q", "R5K7", "R7D1", "R9K3", "SM54", "T54A", "U26C", "UI76", "UK24", "V55J", "VG39",
    "X19V", "X1Y5", "X1Z4", "XU70",
];

/// A registry row as listed by the `teams` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamEntry {
    pub team_id: String,
    pub implemented: bool,
}

/// Table of team keys and their pipeline factories.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    entries: BTreeMap<String, Option<PipelineFactory>>,
}

fn team_2t6s() -> Box<dyn Pipeline> {
    Box::new(PipelineTeam2T6S::new())
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry of NARPS teams, built on first use.
    pub fn builtin() -> &'static PipelineRegistry {
        Self::builtin_entry().as_ref()
    }

    /// A handle on the process-wide registry. Every handle points to the
    /// same instance.
    pub fn shared() -> Arc<PipelineRegistry> {
        Arc::clone(Self::builtin_entry())
    }

    fn builtin_entry() -> &'static Arc<PipelineRegistry> {
        static BUILTIN: OnceLock<Arc<PipelineRegistry>> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut registry = PipelineRegistry::new();
            for team_id in NARPS_TEAMS {
                registry.register(team_id, None);
            }
            registry.register("2T6S", Some(team_2t6s));
            Arc::new(registry)
        })
    }

    /// Registers a team key. `None` marks a known team without implementation.
    pub fn register(&mut self, team_id: impl Into<String>, factory: Option<PipelineFactory>) -> &mut Self {
        self.entries.insert(team_id.into(), factory);
        self
    }

    /// Returns true if the key is known.
    pub fn contains(&self, team_id: &str) -> bool {
        self.entries.contains_key(team_id)
    }

    /// Returns true if the key is known and has a pipeline.
    pub fn is_implemented(&self, team_id: &str) -> bool {
        matches!(self.entries.get(team_id), Some(Some(_)))
    }

    /// Builds a new pipeline for `team_id`.
    ///
    /// # Errors
    ///
    /// - `RunnerError::UnknownTeam` if the key is not registered
    /// - `RunnerError::NotImplemented` if the key has no pipeline
    pub fn resolve(&self, team_id: &str) -> Result<Box<dyn Pipeline>, RunnerError> {
        match self.entries.get(team_id) {
            None => Err(RunnerError::UnknownTeam(team_id.to_string())),
            Some(None) => Err(RunnerError::NotImplemented(team_id.to_string())),
            Some(Some(factory)) => {
                debug!("Instantiating pipeline for team {}", team_id);
                Ok(factory())
            }
        }
    }

    /// All registered keys in key order.
    pub fn teams(&self) -> Vec<TeamEntry> {
        self.entries
            .iter()
            .map(|(team_id, factory)| TeamEntry {
                team_id: team_id.clone(),
                implemented: factory.is_some(),
            })
            .collect()
    }

    /// Keys that have a pipeline.
    pub fn implemented_teams(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, factory)| factory.is_some())
            .map(|(team_id, _)| team_id.as_str())
            .collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
