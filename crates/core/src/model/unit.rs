use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::UnitId;

/// Number of columns in the learning-path grid.
pub const GRID_COLUMNS: u32 = 5;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnitError {
    #[error("unit name cannot be empty")]
    EmptyName,
}

//
// ─── GRID POSITION ─────────────────────────────────────────────────────────────
//

/// Row/column coordinates derived from a unit's flat `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub row: u32,
    pub column: u32,
}

impl GridCell {
    #[must_use]
    pub fn from_position(position: u32) -> Self {
        Self {
            row: position / GRID_COLUMNS,
            column: position % GRID_COLUMNS,
        }
    }

    /// Four-directional neighbourhood test. Diagonals are not adjacent.
    #[must_use]
    pub fn is_adjacent(self, other: GridCell) -> bool {
        let same_row = self.row == other.row;
        let same_column = self.column == other.column;
        (same_column && self.row.abs_diff(other.row) == 1)
            || (same_row && self.column.abs_diff(other.column) == 1)
    }
}

//
// ─── UNIT ──────────────────────────────────────────────────────────────────────
//

/// A single lesson node placed on the learning-path grid.
///
/// Units are authored elsewhere and treated as immutable while a learner
/// is working through the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    position: u32,
    mandatory: bool,
    name: String,
    description: Option<String>,
}

impl Unit {
    /// Creates a new unit.
    ///
    /// # Errors
    ///
    /// Returns `UnitError::EmptyName` if name is empty or whitespace-only.
    pub fn new(
        id: UnitId,
        position: u32,
        mandatory: bool,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<Self, UnitError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(UnitError::EmptyName);
        }

        let description = description
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(Self {
            id,
            position,
            mandatory,
            name: name.trim().to_owned(),
            description,
        })
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// True when the unit sits on the main path and gates the final test.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn cell(&self) -> GridCell {
        GridCell::from_position(self.position)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_rejects_blank_name() {
        let err = Unit::new(UnitId::new(1), 0, true, "  ", None).unwrap_err();
        assert_eq!(err, UnitError::EmptyName);
    }

    #[test]
    fn unit_trims_name_and_drops_blank_description() {
        let unit = Unit::new(UnitId::new(1), 7, false, " Greetings ", Some("   ".into())).unwrap();
        assert_eq!(unit.name(), "Greetings");
        assert_eq!(unit.description(), None);
        assert_eq!(unit.cell(), GridCell { row: 1, column: 2 });
    }

    #[test]
    fn adjacency_is_four_directional() {
        let origin = GridCell::from_position(6);
        assert!(origin.is_adjacent(GridCell::from_position(1)));
        assert!(origin.is_adjacent(GridCell::from_position(11)));
        assert!(origin.is_adjacent(GridCell::from_position(5)));
        assert!(origin.is_adjacent(GridCell::from_position(7)));
        assert!(!origin.is_adjacent(GridCell::from_position(0)));
        assert!(!origin.is_adjacent(GridCell::from_position(12)));
        assert!(!origin.is_adjacent(origin));
    }

    #[test]
    fn row_wrap_is_not_adjacent() {
        // 4 is the last column of row 0, 5 is the first column of row 1.
        let end = GridCell::from_position(4);
        let start = GridCell::from_position(5);
        assert!(!end.is_adjacent(start));
        assert!(!start.is_adjacent(end));
    }
}
