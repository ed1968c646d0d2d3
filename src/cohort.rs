//! Cohort resolution.
//!
//! Turns a subject selection request into an ordered list of canonical
//! subject identifiers. Three selection modes exist and each one produces a
//! whole new cohort:
//!
//! - **Explicit**: raw identifiers, canonicalized and checked against the
//!   full participant universe.
//! - **Random**: `count` draws *with replacement* from the team's eligible
//!   pool. Draws are kept as is, so the cohort may repeat a subject.
//! - **Subset**: the registry's deterministic subset of `count` subjects.

use std::collections::HashSet;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RunnerError;
use crate::participants::{ParticipantRegistry, SubjectId};

/// A request for a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortSelection {
    /// An explicit list of raw subject identifiers.
    Explicit(Vec<String>),
    /// A random draw of the given size from the team's eligible pool.
    Random(usize),
    /// A deterministic subset of the given size.
    Subset(usize),
}

/// Canonicalizes and validates explicit identifiers.
///
/// Fails on the first identifier that cannot be canonicalized or that is
/// not part of the participant universe. Duplicates are collapsed, keeping
/// the position of their first occurrence.
pub fn resolve_explicit<S: AsRef<str>>(
    registry: &dyn ParticipantRegistry,
    raw_ids: &[S],
) -> Result<Vec<SubjectId>, RunnerError> {
    let universe = registry.all_participants();

    let mut subjects = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        let raw = raw.as_ref();
        let subject = SubjectId::parse(raw)
            .filter(|subject| universe.contains(subject))
            .ok_or_else(|| RunnerError::InvalidSubject(raw.to_string()))?;
        subjects.push(subject);
    }

    Ok(dedup_preserving_order(subjects))
}

/// Draws `count` subjects with replacement from the eligible pool of `team`.
///
/// Repeated draws are kept. An empty pool yields an empty cohort.
pub fn resolve_random<R>(
    registry: &dyn ParticipantRegistry,
    team: &str,
    count: usize,
    rng: &mut R,
) -> Vec<SubjectId>
where
    R: rand::Rng + ?Sized,
{
    let pool = registry.eligible_for(team);
    let draws: Vec<SubjectId> = (0..count)
        .filter_map(|_| pool.choose(&mut *rng).cloned())
        .collect();

    let distinct = draws.iter().collect::<HashSet<_>>().len();
    if distinct < count {
        warn!(
            requested = count,
            distinct,
            pool = pool.len(),
            "Random selection drew fewer distinct subjects than requested for team {}",
            team
        );
    }
    draws
}

/// Returns the registry's deterministic subset of `count` subjects.
pub fn resolve_subset(registry: &dyn ParticipantRegistry, count: usize) -> Vec<SubjectId> {
    dedup_preserving_order(registry.fixed_subset(count))
}

fn dedup_preserving_order(subjects: Vec<SubjectId>) -> Vec<SubjectId> {
    let mut seen = HashSet::with_capacity(subjects.len());
    subjects
        .into_iter()
        .filter(|subject| seen.insert(subject.clone()))
        .collect()
}
