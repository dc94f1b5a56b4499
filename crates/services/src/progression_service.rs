use std::sync::Arc;

use learnpath_core::grid::UnlockGraph;
use learnpath_core::model::{CurriculumId, UnitId, UserId};
use learnpath_core::progression::PathMap;
use storage::repository::{CurriculumRepository, ProgressStore, Storage};

use crate::error::ProgressionError;
use crate::sessions::SessionQueries;

/// Builds the learner's path map from stored progress.
///
/// Every call reads a fresh approved snapshot, so a map fetched after a passed
/// attempt reflects it.
#[derive(Clone)]
pub struct ProgressionService {
    curricula: Arc<dyn CurriculumRepository>,
    progress: Arc<dyn ProgressStore>,
}

impl ProgressionService {
    #[must_use]
    pub fn new(storage: &Storage) -> Self {
        Self {
            curricula: Arc::clone(&storage.curricula),
            progress: Arc::clone(&storage.progress),
        }
    }

    /// Path map using grid adjacency for optional units.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Storage` when progress cannot be loaded.
    pub async fn path_map(
        &self,
        user: UserId,
        curriculum: CurriculumId,
    ) -> Result<PathMap, ProgressionError> {
        let loaded = SessionQueries::load_path(
            user,
            curriculum,
            self.curricula.as_ref(),
            self.progress.as_ref(),
        )
        .await?;
        Ok(loaded.path_map(None))
    }

    /// Path map with explicitly authored unlock edges.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Storage` when progress cannot be loaded.
    pub async fn path_map_with_edges(
        &self,
        user: UserId,
        curriculum: CurriculumId,
        edges: &[(UnitId, UnitId)],
    ) -> Result<PathMap, ProgressionError> {
        let loaded = SessionQueries::load_path(
            user,
            curriculum,
            self.curricula.as_ref(),
            self.progress.as_ref(),
        )
        .await?;
        let graph = UnlockGraph::from_edges(loaded.curriculum.units(), edges);
        Ok(loaded.path_map(Some(&graph)))
    }
}
