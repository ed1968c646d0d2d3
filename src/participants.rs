//! Participant registry.
//!
//! Provides the canonical [`SubjectId`] form and the [`ParticipantRegistry`]
//! collaborator used by the cohort resolver: the full participant universe,
//! the participants usable by a given team, and a deterministic subset.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ParticipantsError;

/// Width of the zero-padded canonical subject identifier.
pub const SUBJECT_ID_WIDTH: usize = 3;

/// Name of the BIDS participants file at the dataset root.
pub const PARTICIPANTS_FILENAME: &str = "participants.tsv";

const PARTICIPANT_ID_COLUMN: &str = "participant_id";
const BIDS_SUBJECT_PREFIX: &str = "sub-";

/// A subject identifier in canonical form (`"001"`, `"042"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Coerces a raw identifier into canonical form.
    ///
    /// The raw value must parse as a non-negative integer once surrounding
    /// whitespace is removed; it is then zero-padded to [`SUBJECT_ID_WIDTH`].
    /// Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let number: u32 = raw.trim().parse().ok()?;
        Some(Self::from_number(number))
    }

    /// Builds the canonical identifier for a subject number.
    pub fn from_number(number: u32) -> Self {
        Self(format!("{:0width$}", number, width = SUBJECT_ID_WIDTH))
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the BIDS label for this subject (`sub-001`).
    pub fn bids_label(&self) -> String {
        format!("{}{}", BIDS_SUBJECT_PREFIX, self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of truth for which subjects exist and which a team may use.
pub trait ParticipantRegistry: Send + Sync {
    /// Every participant of the dataset.
    fn all_participants(&self) -> BTreeSet<SubjectId>;

    /// Participants usable by `team`, in a stable order.
    fn eligible_for(&self, team: &str) -> Vec<SubjectId>;

    /// A deterministic subset of `count` participants of the full universe.
    fn fixed_subset(&self, count: usize) -> Vec<SubjectId>;
}

/// Participant table backed by the dataset's `participants.tsv`.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTable {
    participants: BTreeSet<SubjectId>,
    exclusions: BTreeMap<String, BTreeSet<SubjectId>>,
}

impl ParticipantTable {
    /// Builds a table from raw identifiers. Invalid identifiers are skipped.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let participants = ids
            .into_iter()
            .filter_map(|id| SubjectId::parse(id.as_ref()))
            .collect();

        Self {
            participants,
            exclusions: BTreeMap::new(),
        }
    }

    /// Loads `participants.tsv` from the dataset root.
    pub fn from_dataset(dataset_dir: impl AsRef<Path>) -> Result<Self, ParticipantsError> {
        Self::from_tsv(dataset_dir.as_ref().join(PARTICIPANTS_FILENAME))
    }

    /// Loads a BIDS participants file.
    ///
    /// The file is tab separated, with a header line containing a
    /// `participant_id` column whose values look like `sub-001`.
    pub fn from_tsv(path: impl Into<PathBuf>) -> Result<Self, ParticipantsError> {
        let path = path.into();
        let contents = fs::read_to_string(&path).map_err(|source| ParticipantsError::Read {
            path: path.clone(),
            source,
        })?;

        let mut lines = contents.lines().enumerate();
        let column = lines
            .next()
            .and_then(|(_, header)| {
                header
                    .split('\t')
                    .position(|name| name.trim() == PARTICIPANT_ID_COLUMN)
            })
            .ok_or_else(|| ParticipantsError::MissingColumn(path.clone()))?;

        let mut participants = BTreeSet::new();
        for (index, line) in lines {
            if line.trim().is_empty() {
                continue;
            }

            let field = line.split('\t').nth(column).ok_or_else(|| {
                ParticipantsError::MalformedRow {
                    line: index + 1,
                    message: format!("missing column {}", column + 1),
                }
            })?;

            let raw = field.trim();
            let raw = raw.strip_prefix(BIDS_SUBJECT_PREFIX).unwrap_or(raw);
            let subject = SubjectId::parse(raw).ok_or_else(|| ParticipantsError::MalformedRow {
                line: index + 1,
                message: format!("invalid participant id '{}'", field.trim()),
            })?;
            participants.insert(subject);
        }

        debug!(
            "Loaded {} participants from {}",
            participants.len(),
            path.display()
        );

        Ok(Self {
            participants,
            exclusions: BTreeMap::new(),
        })
    }

    /// Excludes subjects from the eligible pool of a team.
    ///
    /// Identifiers that cannot be canonicalized are ignored.
    pub fn with_exclusions<I, S>(mut self, team: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded = self.exclusions.entry(team.into()).or_default();
        excluded.extend(subjects.into_iter().filter_map(|s| SubjectId::parse(s.as_ref())));
        self
    }

    /// Adds every exclusion list of a configuration section.
    pub fn with_exclusion_map(mut self, exclusions: &BTreeMap<String, Vec<String>>) -> Self {
        for (team, subjects) in exclusions {
            self = self.with_exclusions(team.clone(), subjects);
        }
        self
    }

    /// Number of participants in the table.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns true if the table holds no participant.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

impl ParticipantRegistry for ParticipantTable {
    fn all_participants(&self) -> BTreeSet<SubjectId> {
        self.participants.clone()
    }

    fn eligible_for(&self, team: &str) -> Vec<SubjectId> {
        match self.exclusions.get(team) {
            Some(excluded) => self
                .participants
                .iter()
                .filter(|subject| !excluded.contains(*subject))
                .cloned()
                .collect(),
            None => self.participants.iter().cloned().collect(),
        }
    }

    fn fixed_subset(&self, count: usize) -> Vec<SubjectId> {
        self.participants.iter().take(count).cloned().collect()
    }
}
