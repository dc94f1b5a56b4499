use std::collections::HashSet;

use learnpath_core::grid::UnlockGraph;
use learnpath_core::model::{AttemptTarget, Curriculum, CurriculumId, SessionSettings, UnitId, UserId};
use learnpath_core::progression::PathMap;
use storage::repository::{CurriculumRepository, ProgressStore, StorageError};
use tracing::debug;

use crate::error::SessionError;

/// A curriculum together with the learner's progress through it.
pub(crate) struct LoadedPath {
    pub curriculum: Curriculum,
    pub approved: HashSet<UnitId>,
    pub final_passed: bool,
}

impl LoadedPath {
    pub fn path_map(&self, graph: Option<&UnlockGraph>) -> PathMap {
        match graph {
            Some(graph) => {
                PathMap::build_with_graph(&self.curriculum, graph, &self.approved, self.final_passed)
            }
            None => PathMap::build(&self.curriculum, &self.approved, self.final_passed),
        }
    }
}

/// Storage-backed progression queries.
pub(crate) struct SessionQueries;

impl SessionQueries {
    /// Fetch the curriculum and one consistent snapshot of progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` when any repository call fails.
    pub async fn load_path(
        user: UserId,
        curriculum_id: CurriculumId,
        curricula: &dyn CurriculumRepository,
        progress: &dyn ProgressStore,
    ) -> Result<LoadedPath, StorageError> {
        let curriculum = curricula.get_curriculum(curriculum_id).await?;
        let approved = progress.get_approved_unit_ids(user, curriculum_id).await?;
        let final_passed = progress.has_passed_final(user, curriculum_id).await?;
        debug!(
            %user,
            curriculum = %curriculum_id,
            approved = approved.len(),
            final_passed,
            "loaded path"
        );
        Ok(LoadedPath {
            curriculum,
            approved,
            final_passed,
        })
    }

    /// Passing score and XP reward that apply to `target`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownTarget` if the curriculum has no such unit
    /// or no final test.
    pub fn grading_for(
        curriculum: &Curriculum,
        target: AttemptTarget,
        settings: &SessionSettings,
    ) -> Result<(u8, u32), SessionError> {
        match target {
            AttemptTarget::Unit(id) => curriculum
                .unit(id)
                .map(|_| (settings.unit_passing_score(), settings.unit_xp_reward()))
                .ok_or(SessionError::UnknownTarget(target)),
            AttemptTarget::FinalTest => curriculum
                .final_test()
                .map(|test| (test.passing_score(), test.xp_reward()))
                .ok_or(SessionError::UnknownTarget(target)),
        }
    }
}
