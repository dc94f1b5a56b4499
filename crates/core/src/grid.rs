//! Grid layout resolver and the unlock graph derived from it.
//!
//! Units carry a flat `position`; the grid is `GRID_COLUMNS` wide, so
//! `row = position / 5` and `column = position % 5`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::model::{GRID_COLUMNS, Unit, UnitId};

//
// ─── LAYOUT ────────────────────────────────────────────────────────────────────
//

/// One occupied row of the grid. Unoccupied columns are simply absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow<'a> {
    pub index: u32,
    pub units: Vec<&'a Unit>,
}

impl<'a> GridRow<'a> {
    /// Unit in the given column, if any.
    #[must_use]
    pub fn cell(&self, column: u32) -> Option<&'a Unit> {
        self.units.iter().copied().find(|u| u.cell().column == column)
    }
}

/// Groups units into rows ordered by row index, each row ordered by column.
///
/// Rows with no units are not emitted and no placeholder units are invented.
/// Colliding positions are logged; both units are kept in id order.
#[must_use]
pub fn layout(units: &[Unit]) -> Vec<GridRow<'_>> {
    let conflicts = find_position_conflicts(units);
    for conflict in &conflicts {
        warn!(
            position = conflict.position,
            units = ?conflict.units,
            "units share a grid position"
        );
    }

    let mut rows: BTreeMap<u32, Vec<&Unit>> = BTreeMap::new();
    for unit in units {
        rows.entry(unit.cell().row).or_default().push(unit);
    }

    rows.into_iter()
        .map(|(index, mut cells)| {
            cells.sort_by_key(|u| (u.cell().column, u.id()));
            GridRow {
                index,
                units: cells,
            }
        })
        .collect()
}

/// Two or more units authored at the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionConflict {
    pub position: u32,
    pub units: Vec<UnitId>,
}

/// Reports every position claimed by more than one unit.
#[must_use]
pub fn find_position_conflicts(units: &[Unit]) -> Vec<PositionConflict> {
    let mut by_position: BTreeMap<u32, Vec<UnitId>> = BTreeMap::new();
    for unit in units {
        by_position.entry(unit.position()).or_default().push(unit.id());
    }
    by_position
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(position, mut ids)| {
            ids.sort();
            PositionConflict {
                position,
                units: ids,
            }
        })
        .collect()
}

//
// ─── UNLOCK GRAPH ──────────────────────────────────────────────────────────────
//

/// For each unit, the set of units whose completion can unlock it.
///
/// Built either from grid adjacency (symmetric) or from an explicit
/// prerequisite edge list for curricula that do not follow the grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockGraph {
    unlocked_by: BTreeMap<UnitId, BTreeSet<UnitId>>,
}

impl UnlockGraph {
    /// Four-directional grid adjacency. No edges wrap across rows.
    #[must_use]
    pub fn from_grid(units: &[Unit]) -> Self {
        let mut at: HashMap<u32, Vec<UnitId>> = HashMap::with_capacity(units.len());
        for unit in units {
            at.entry(unit.position()).or_default().push(unit.id());
        }

        let mut unlocked_by: BTreeMap<UnitId, BTreeSet<UnitId>> = BTreeMap::new();
        for unit in units {
            let entry = unlocked_by.entry(unit.id()).or_default();
            for position in neighbour_positions(unit.position()) {
                if let Some(ids) = at.get(&position) {
                    entry.extend(ids.iter().copied());
                }
            }
        }

        Self { unlocked_by }
    }

    /// Explicit `(prerequisite, dependent)` edges.
    ///
    /// Edges naming a unit outside `units` are logged and dropped.
    #[must_use]
    pub fn from_edges(units: &[Unit], edges: &[(UnitId, UnitId)]) -> Self {
        let mut unlocked_by: BTreeMap<UnitId, BTreeSet<UnitId>> =
            units.iter().map(|u| (u.id(), BTreeSet::new())).collect();

        for &(from, to) in edges {
            if from == to || !unlocked_by.contains_key(&from) {
                warn!(%from, %to, "dropping unlock edge with unknown or self prerequisite");
                continue;
            }
            match unlocked_by.get_mut(&to) {
                Some(set) => {
                    set.insert(from);
                }
                None => warn!(%from, %to, "dropping unlock edge to unknown unit"),
            }
        }

        Self { unlocked_by }
    }

    /// Units whose completion unlocks `id`, in id order.
    pub fn unlocked_by(&self, id: UnitId) -> impl Iterator<Item = UnitId> + '_ {
        self.unlocked_by.get(&id).into_iter().flatten().copied()
    }

    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        self.unlocked_by.contains_key(&id)
    }
}

fn neighbour_positions(position: u32) -> impl Iterator<Item = u32> {
    let column = position % GRID_COLUMNS;
    let up = position.checked_sub(GRID_COLUMNS);
    let down = position.checked_add(GRID_COLUMNS);
    let left = (column > 0).then(|| position - 1);
    let right = (column + 1 < GRID_COLUMNS).then(|| position + 1);
    [up, down, left, right].into_iter().flatten()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
