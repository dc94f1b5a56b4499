//! JSON curriculum documents as authored by admin tooling.

use std::path::Path;

use learnpath_core::model::{
    AttemptTarget, Curriculum, CurriculumId, FinalTest, Question, QuestionId, QuestionKind,
    SessionSettingsDraft, Unit, UnitId,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CurriculumFile {
    pub id: u64,
    pub name: String,
    pub units: Vec<UnitEntry>,
    #[serde(default)]
    pub final_test: Option<FinalTestEntry>,
    /// Explicit `[from, to]` unlock edges; grid adjacency when absent.
    #[serde(default)]
    pub edges: Option<Vec<(u64, u64)>>,
    #[serde(default)]
    pub settings: Option<SessionSettingsDraft>,
}

#[derive(Debug, Deserialize)]
pub struct UnitEntry {
    pub id: u64,
    pub position: u32,
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionEntry>,
}

fn default_mandatory() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct FinalTestEntry {
    pub name: String,
    pub passing_score: u8,
    pub xp_reward: u32,
    #[serde(default)]
    pub questions: Vec<QuestionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionEntry {
    pub id: u64,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Validated contents of a curriculum document.
#[derive(Debug)]
pub struct LoadedCurriculum {
    pub curriculum: Curriculum,
    pub banks: Vec<(AttemptTarget, Vec<Question>)>,
    pub edges: Option<Vec<(UnitId, UnitId)>>,
    pub settings: SessionSettingsDraft,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid curriculum json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] learnpath_core::Error),
}

impl CurriculumFile {
    /// # Errors
    ///
    /// Returns `LoadError` if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// # Errors
    ///
    /// Returns `LoadError::Json` for malformed documents.
    pub fn parse(raw: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Validate every entry through the domain constructors.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Model` for the first invalid unit, question, or test.
    pub fn into_model(self) -> Result<LoadedCurriculum, LoadError> {
        let mut banks = Vec::new();
        let mut units = Vec::with_capacity(self.units.len());
        for entry in self.units {
            let unit = Unit::new(
                UnitId::new(entry.id),
                entry.position,
                entry.mandatory,
                entry.name,
                entry.description,
            )
            .map_err(learnpath_core::Error::from)?;
            banks.push((AttemptTarget::Unit(unit.id()), questions(entry.questions)?));
            units.push(unit);
        }

        let final_test = match self.final_test {
            Some(entry) => {
                let test = FinalTest::new(entry.name, entry.passing_score, entry.xp_reward)
                    .map_err(learnpath_core::Error::from)?;
                banks.push((AttemptTarget::FinalTest, questions(entry.questions)?));
                Some(test)
            }
            None => None,
        };

        let curriculum = Curriculum::new(CurriculumId::new(self.id), self.name, units, final_test)
            .map_err(learnpath_core::Error::from)?;
        let edges = self.edges.map(|edges| {
            edges
                .into_iter()
                .map(|(from, to)| (UnitId::new(from), UnitId::new(to)))
                .collect()
        });

        Ok(LoadedCurriculum {
            curriculum,
            banks,
            edges,
            settings: self.settings.unwrap_or_default(),
        })
    }
}

fn questions(entries: Vec<QuestionEntry>) -> Result<Vec<Question>, LoadError> {
    entries
        .into_iter()
        .map(|q| {
            Question::new(QuestionId::new(q.id), q.prompt, q.kind)
                .map_err(|e| LoadError::Model(e.into()))
        })
        .collect()
}

/// Built-in curriculum used when no file is given.
pub const DEMO_CURRICULUM: &str = r#"{
  "id": 1,
  "name": "Spanish basics",
  "units": [
    { "id": 1, "position": 0, "name": "Greetings", "questions": [
      { "id": 1, "prompt": "'Hola' means hello", "type": "true_false", "answer": true },
      { "id": 2, "prompt": "Translate: good morning", "type": "fill_in_blank", "accepted": ["buenos dias", "buenos días"] },
      { "id": 3, "prompt": "Pick 'goodbye'", "type": "multiple_choice", "options": ["hola", "adiós", "gracias"], "correct_option": 1 },
      { "id": 4, "prompt": "Order: my name is Ana", "type": "word_ordering", "words": ["me", "llamo", "Ana"] }
    ]},
    { "id": 2, "position": 1, "name": "Numbers", "questions": [
      { "id": 5, "prompt": "'Tres' is three", "type": "true_false", "answer": true },
      { "id": 6, "prompt": "Translate: ten", "type": "fill_in_blank", "accepted": ["diez"] }
    ]},
    { "id": 3, "position": 5, "mandatory": false, "name": "Bonus: Food", "questions": [
      { "id": 7, "prompt": "'Pan' is bread", "type": "true_false", "answer": true }
    ]},
    { "id": 4, "position": 2, "name": "Family", "questions": [
      { "id": 8, "prompt": "Translate: mother", "type": "fill_in_blank", "accepted": ["madre"] }
    ]}
  ],
  "final_test": { "name": "Final exam", "passing_score": 80, "xp_reward": 50, "questions": [
    { "id": 9, "prompt": "'Hermano' is brother", "type": "true_false", "answer": true },
    { "id": 10, "prompt": "Translate: two", "type": "fill_in_blank", "accepted": ["dos"] }
  ]}
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_curriculum_loads() {
        let loaded = CurriculumFile::parse(DEMO_CURRICULUM)
            .unwrap()
            .into_model()
            .unwrap();
        assert_eq!(loaded.curriculum.units().len(), 4);
        assert!(loaded.curriculum.final_test().is_some());
        assert_eq!(loaded.banks.len(), 5);
        assert!(loaded.edges.is_none());
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let raw = r#"{ "id": 1, "name": "x", "units": [
            { "id": 1, "position": 0, "name": "  " }
        ]}"#;
        let err = CurriculumFile::parse(raw).unwrap().into_model().unwrap_err();
        assert!(matches!(err, LoadError::Model(_)));

        let raw = r#"{ "id": 1, "name": "x", "units": [
            { "id": 1, "position": 0, "name": "A", "questions": [
                { "id": 1, "prompt": "p", "type": "multiple_choice", "options": ["a", "b"], "correct_option": 7 }
            ]}
        ]}"#;
        assert!(CurriculumFile::parse(raw).unwrap().into_model().is_err());
    }
}
