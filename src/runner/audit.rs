//! Completion audit.
//!
//! Compares the files a pipeline declares against the filesystem. Nothing is
//! cached: every call looks at the disk again, so an interrupted run can be
//! audited, resumed and audited once more.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::participants::SubjectId;
use crate::pipeline::ExecutionScope;

/// Returns the expected files that are not regular files on disk.
pub fn missing_files<I>(expected: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    expected.into_iter().filter(|path| !path.is_file()).collect()
}

/// Missing outputs of a team for a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAudit {
    pub team_id: String,
    pub subjects: Vec<SubjectId>,
    pub scope: ExecutionScope,
    /// Missing first level files, `None` when the level is out of scope.
    pub first_level: Option<Vec<PathBuf>>,
    /// Missing group level files, `None` when the level is out of scope.
    pub group_level: Option<Vec<PathBuf>>,
    pub checked_at: DateTime<Utc>,
}

impl OutputAudit {
    /// Total number of missing files.
    pub fn missing_count(&self) -> usize {
        self.first_level.as_ref().map_or(0, Vec::len) + self.group_level.as_ref().map_or(0, Vec::len)
    }

    /// Returns true when nothing is missing.
    pub fn is_complete(&self) -> bool {
        self.missing_count() == 0
    }

    /// All missing files, first level first.
    pub fn missing(&self) -> impl Iterator<Item = &PathBuf> {
        self.first_level
            .iter()
            .chain(self.group_level.iter())
            .flatten()
    }
}
