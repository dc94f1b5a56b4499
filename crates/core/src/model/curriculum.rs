use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CurriculumId, UnitId};
use crate::model::unit::Unit;

/// Passing threshold used when a final test does not override it.
pub const DEFAULT_FINAL_PASSING_SCORE: u8 = 80;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CurriculumError {
    #[error("curriculum name cannot be empty")]
    EmptyName,

    #[error("unit id {0} appears more than once")]
    DuplicateUnitId(UnitId),

    #[error("passing score must be between 1 and 100, got {0}")]
    InvalidPassingScore(u8),
}

//
// ─── FINAL TEST ────────────────────────────────────────────────────────────────
//

/// Terminal assessment unlocked once every mandatory unit is approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTest {
    name: String,
    passing_score: u8,
    xp_reward: u32,
}

impl FinalTest {
    /// Creates a final test definition.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError::InvalidPassingScore` unless `passing_score` is in `1..=100`.
    pub fn new(
        name: impl Into<String>,
        passing_score: u8,
        xp_reward: u32,
    ) -> Result<Self, CurriculumError> {
        if !(1..=100).contains(&passing_score) {
            return Err(CurriculumError::InvalidPassingScore(passing_score));
        }
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CurriculumError::EmptyName);
        }
        Ok(Self {
            name: name.trim().to_owned(),
            passing_score,
            xp_reward,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn passing_score(&self) -> u8 {
        self.passing_score
    }

    #[must_use]
    pub fn xp_reward(&self) -> u32 {
        self.xp_reward
    }
}

//
// ─── CURRICULUM ────────────────────────────────────────────────────────────────
//

/// Ordered collection of units plus the optional terminal final test.
///
/// Units are kept sorted by `(position, id)` so every consumer sees the
/// same order regardless of how the authoring tool listed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    id: CurriculumId,
    name: String,
    units: Vec<Unit>,
    final_test: Option<FinalTest>,
}

impl Curriculum {
    /// Creates a curriculum.
    ///
    /// Duplicate positions are tolerated here; they are an authoring error the
    /// layout resolver reports. Duplicate unit ids are rejected because every
    /// state map is keyed by id.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError::EmptyName` or `CurriculumError::DuplicateUnitId`.
    pub fn new(
        id: CurriculumId,
        name: impl Into<String>,
        mut units: Vec<Unit>,
        final_test: Option<FinalTest>,
    ) -> Result<Self, CurriculumError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CurriculumError::EmptyName);
        }

        let mut seen = HashSet::with_capacity(units.len());
        for unit in &units {
            if !seen.insert(unit.id()) {
                return Err(CurriculumError::DuplicateUnitId(unit.id()));
            }
        }

        units.sort_by_key(|unit| (unit.position(), unit.id()));

        Ok(Self {
            id,
            name: name.trim().to_owned(),
            units,
            final_test,
        })
    }

    #[must_use]
    pub fn id(&self) -> CurriculumId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    #[must_use]
    pub fn final_test(&self) -> Option<&FinalTest> {
        self.final_test.as_ref()
    }

    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.id() == id)
    }

    /// Mandatory units in main-path order (ascending position).
    pub fn mandatory_units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|unit| unit.is_mandatory())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
