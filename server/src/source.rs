//! Question Source Adapter: where question snapshots come from
//!
//! The coordinator only ever sees the [`QuestionSource`] trait. The
//! shipped implementation reads a JSON quiz catalog from disk once at
//! startup; tests feed the registry an in-memory map instead. Either
//! way a session gets its own clone of the question list, so edits to
//! the catalog never reach a game already in progress.

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use shared::Question;
use std::collections::HashMap;
use std::path::Path;

use crate::error::SessionError;

#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Returns the ordered question list for a quiz, or `QuizNotFound`.
    async fn fetch(&self, quiz_id: &str) -> Result<Vec<Question>, SessionError>;
}

/// One quiz in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizDefinition {
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// Catalog loaded from a JSON file mapping quiz id to definition:
///
/// ```json
/// { "capitals": { "title": "Capitals", "questions": [ ... ] } }
/// ```
pub struct FileQuestionSource {
    quizzes: HashMap<String, QuizDefinition>,
}

impl FileQuestionSource {
    pub fn from_path(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let quizzes: HashMap<String, QuizDefinition> = serde_json::from_str(&data)?;
        info!("Loaded {} quizzes from {}", quizzes.len(), path.display());
        Ok(Self { quizzes })
    }
}

#[async_trait]
impl QuestionSource for FileQuestionSource {
    async fn fetch(&self, quiz_id: &str) -> Result<Vec<Question>, SessionError> {
        self.quizzes
            .get(quiz_id)
            .map(|quiz| quiz.questions.clone())
            .ok_or_else(|| SessionError::QuizNotFound(quiz_id.to_string()))
    }
}

/// In-memory source for tests and embedding.
pub struct StaticQuestionSource {
    quizzes: HashMap<String, Vec<Question>>,
}

impl StaticQuestionSource {
    pub fn new<I>(quizzes: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Question>)>,
    {
        Self {
            quizzes: quizzes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl QuestionSource for StaticQuestionSource {
    async fn fetch(&self, quiz_id: &str) -> Result<Vec<Question>, SessionError> {
        self.quizzes
            .get(quiz_id)
            .cloned()
            .ok_or_else(|| SessionError::QuizNotFound(quiz_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_fetch() {
        let source = StaticQuestionSource::new([(
            "quiz-1".to_string(),
            vec![Question {
                text: "q".to_string(),
                options: vec!["a".to_string()],
                correct_option: 0,
                time_limit: 20,
                points: 1000,
            }],
        )]);

        let questions = source.fetch("quiz-1").await.unwrap();
        assert_eq!(questions.len(), 1);

        let err = source.fetch("other").await.unwrap_err();
        assert_eq!(err, SessionError::QuizNotFound("other".to_string()));
    }

    #[test]
    fn test_catalog_parsing() {
        let catalog = r#"{
            "capitals": {
                "title": "Capitals of Europe",
                "questions": [
                    {"text": "Capital of Norway?", "options": ["Oslo", "Bergen"], "correct_option": 0}
                ]
            }
        }"#;

        let quizzes: HashMap<String, QuizDefinition> = serde_json::from_str(catalog).unwrap();
        let quiz = &quizzes["capitals"];
        assert_eq!(quiz.title, "Capitals of Europe");
        assert_eq!(quiz.questions[0].time_limit, shared::DEFAULT_TIME_LIMIT);
        assert_eq!(quiz.questions[0].points, shared::DEFAULT_POINTS);
    }
}
