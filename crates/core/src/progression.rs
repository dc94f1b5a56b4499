//! Unit state engine and final-exam gate.
//!
//! States are derived on every call from `(units, approved)`; nothing here is
//! cached or persisted. Malformed input never panics: ids that do not resolve
//! are logged and ignored.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::grid::{UnlockGraph, layout};
use crate::model::{AttemptTarget, Curriculum, Unit, UnitId};

//
// ─── STATES ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Locked,
    Available,
    Completed,
}

impl UnitState {
    /// Available and completed nodes may both be opened (re-attempts are allowed).
    #[must_use]
    pub fn is_clickable(self) -> bool {
        !matches!(self, UnitState::Locked)
    }
}

/// The final test uses the same three states as units.
pub type FinalTestState = UnitState;

//
// ─── UNIT STATE ENGINE ─────────────────────────────────────────────────────────
//

/// Computes every unit's state using grid adjacency for optional branches.
#[must_use]
pub fn compute_states(units: &[Unit], approved: &HashSet<UnitId>) -> BTreeMap<UnitId, UnitState> {
    compute_states_with_graph(units, &UnlockGraph::from_grid(units), approved)
}

/// Computes every unit's state with an explicit unlock graph.
///
/// 1. Approved units are completed.
/// 2. Mandatory units form the main path by ascending position; the first is
///    available until completed, each later one once its predecessor is.
/// 3. Optional units are available once any unit in `unlocked_by` is completed.
/// 4. Everything else is locked.
///
/// Availability reads only completion, so one pass over a fixed approved set
/// is enough and the result is independent of `units` order.
#[must_use]
pub fn compute_states_with_graph(
    units: &[Unit],
    graph: &UnlockGraph,
    approved: &HashSet<UnitId>,
) -> BTreeMap<UnitId, UnitState> {
    let known: HashSet<UnitId> = units.iter().map(Unit::id).collect();
    let mut dangling: Vec<UnitId> = approved
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect();
    if !dangling.is_empty() {
        dangling.sort();
        warn!(ids = ?dangling, "ignoring approved ids with no matching unit");
    }

    let completed = |id: UnitId| approved.contains(&id) && known.contains(&id);

    let mut main_path: Vec<&Unit> = units.iter().filter(|u| u.is_mandatory()).collect();
    main_path.sort_by_key(|u| (u.position(), u.id()));

    let mut states = BTreeMap::new();

    let mut predecessor: Option<UnitId> = None;
    for unit in main_path {
        let state = if completed(unit.id()) {
            UnitState::Completed
        } else if predecessor.is_none_or(completed) {
            UnitState::Available
        } else {
            UnitState::Locked
        };
        states.insert(unit.id(), state);
        predecessor = Some(unit.id());
    }

    for unit in units.iter().filter(|u| !u.is_mandatory()) {
        let state = if completed(unit.id()) {
            UnitState::Completed
        } else if graph.unlocked_by(unit.id()).any(completed) {
            UnitState::Available
        } else {
            UnitState::Locked
        };
        states.insert(unit.id(), state);
    }

    states
}

//
// ─── FINAL-EXAM GATE ───────────────────────────────────────────────────────────
//

/// State of the terminal assessment.
///
/// Completed when a passing final attempt exists. Otherwise available only if
/// there is at least one mandatory unit and all of them are approved.
#[must_use]
pub fn final_test_state(
    units: &[Unit],
    approved: &HashSet<UnitId>,
    final_passed: bool,
) -> FinalTestState {
    if final_passed {
        return UnitState::Completed;
    }

    let mut mandatory = units.iter().filter(|u| u.is_mandatory()).peekable();
    if mandatory.peek().is_none() {
        return UnitState::Locked;
    }
    if mandatory.all(|u| approved.contains(&u.id())) {
        UnitState::Available
    } else {
        UnitState::Locked
    }
}

//
// ─── PRESENTATION GRAPH ────────────────────────────────────────────────────────
//

/// A unit as drawn on the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub unit_id: UnitId,
    pub name: String,
    pub column: u32,
    pub mandatory: bool,
    pub state: UnitState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRow {
    pub index: u32,
    pub nodes: Vec<PathNode>,
}

/// Everything the UI needs to decide which node is clickable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMap {
    pub rows: Vec<PathRow>,
    /// `None` when the curriculum has no final test.
    pub final_test: Option<FinalTestState>,
}

impl PathMap {
    /// Lays out the curriculum and derives all states from one approved snapshot.
    #[must_use]
    pub fn build(curriculum: &Curriculum, approved: &HashSet<UnitId>, final_passed: bool) -> Self {
        let units = curriculum.units();
        let states = compute_states(units, approved);
        Self::assemble(curriculum, &states, approved, final_passed)
    }

    /// Same as [`PathMap::build`] with an explicit unlock graph.
    #[must_use]
    pub fn build_with_graph(
        curriculum: &Curriculum,
        graph: &UnlockGraph,
        approved: &HashSet<UnitId>,
        final_passed: bool,
    ) -> Self {
        let states = compute_states_with_graph(curriculum.units(), graph, approved);
        Self::assemble(curriculum, &states, approved, final_passed)
    }

    fn assemble(
        curriculum: &Curriculum,
        states: &BTreeMap<UnitId, UnitState>,
        approved: &HashSet<UnitId>,
        final_passed: bool,
    ) -> Self {
        let rows = layout(curriculum.units())
            .into_iter()
            .map(|row| PathRow {
                index: row.index,
                nodes: row
                    .units
                    .into_iter()
                    .map(|unit| PathNode {
                        unit_id: unit.id(),
                        name: unit.name().to_owned(),
                        column: unit.cell().column,
                        mandatory: unit.is_mandatory(),
                        state: states.get(&unit.id()).copied().unwrap_or(UnitState::Locked),
                    })
                    .collect(),
            })
            .collect();

        let final_test = curriculum
            .final_test()
            .map(|_| final_test_state(curriculum.units(), approved, final_passed));

        Self { rows, final_test }
    }

    #[must_use]
    pub fn state_of(&self, id: UnitId) -> Option<UnitState> {
        self.rows
            .iter()
            .flat_map(|row| &row.nodes)
            .find(|node| node.unit_id == id)
            .map(|node| node.state)
    }

    /// Whether the learner may start an attempt at `target`.
    #[must_use]
    pub fn is_clickable(&self, target: AttemptTarget) -> bool {
        match target {
            AttemptTarget::Unit(id) => self.state_of(id).is_some_and(UnitState::is_clickable),
            AttemptTarget::FinalTest => self.final_test.is_some_and(UnitState::is_clickable),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
