//! In-memory [`TutorStore`] for tests, demos and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use tutor_core::attempt::QuizAttempt;
use tutor_core::books::{check_unique_active_links, Book, BookRecommendation};
use tutor_core::catalog::{load_catalog_directory, Catalog};
use tutor_core::model::{ClassProfile, QuizQuestion, QuizStatus, RecommendationStatus, StudentProfile};
use tutor_core::quiz::PersonalizedQuiz;
use tutor_core::{EntityKind, Result, TutorError, TutorStore};

use crate::config::TutorConfig;

/// Serializable dump of every record in a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub profiles: Vec<StudentProfile>,
    #[serde(default)]
    pub classes: Vec<ClassProfile>,
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub quizzes: Vec<PersonalizedQuiz>,
    /// In insertion order.
    #[serde(default)]
    pub attempts: Vec<QuizAttempt>,
    #[serde(default)]
    pub recommendations: Vec<BookRecommendation>,
}

#[derive(Default)]
struct Records {
    profiles: HashMap<String, StudentProfile>,
    classes: HashMap<String, ClassProfile>,
    questions: Vec<QuizQuestion>,
    books: Vec<Book>,
    quizzes: HashMap<Uuid, PersonalizedQuiz>,
    attempts: HashMap<Uuid, QuizAttempt>,
    attempt_order: Vec<Uuid>,
    recommendations: HashMap<Uuid, BookRecommendation>,
}

/// A [`TutorStore`] backed by hash maps behind a single `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with a catalog's questions and books.
    pub fn with_catalog(catalog: Catalog) -> Result<Self> {
        check_unique_active_links(catalog.books.iter().flat_map(|b| &b.affiliate_links))?;
        Ok(Self {
            records: RwLock::new(Records {
                questions: catalog.questions,
                books: catalog.books,
                ..Records::default()
            }),
        })
    }

    /// A store seeded from `config.catalog_dir`, or an empty store when unset.
    pub fn from_config(config: &TutorConfig) -> anyhow::Result<Self> {
        let Some(dir) = &config.catalog_dir else {
            return Ok(Self::new());
        };
        let catalogs = load_catalog_directory(dir)?;
        match Catalog::merge(catalogs) {
            Some(catalog) => {
                tracing::info!(
                    dir = %dir.display(),
                    questions = catalog.questions.len(),
                    books = catalog.books.len(),
                    "catalogs loaded"
                );
                Ok(Self::with_catalog(catalog)?)
            }
            None => {
                tracing::warn!(dir = %dir.display(), "no catalogs found");
                Ok(Self::new())
            }
        }
    }

    pub async fn add_class(&self, class: ClassProfile) {
        self.records
            .write()
            .await
            .classes
            .insert(class.id.clone(), class);
    }

    pub async fn add_questions(&self, questions: impl IntoIterator<Item = QuizQuestion>) -> Result<()> {
        let questions: Vec<QuizQuestion> = questions.into_iter().collect();
        for q in &questions {
            q.validate()?;
        }
        self.records.write().await.questions.extend(questions);
        Ok(())
    }

    pub async fn add_books(&self, books: impl IntoIterator<Item = Book>) -> Result<()> {
        let books: Vec<Book> = books.into_iter().collect();
        for b in &books {
            b.validate()?;
        }
        let mut records = self.records.write().await;
        check_unique_active_links(
            records
                .books
                .iter()
                .chain(books.iter())
                .flat_map(|b| &b.affiliate_links),
        )?;
        records.books.extend(books);
        Ok(())
    }

    /// Dump every record.
    pub async fn snapshot(&self) -> Snapshot {
        let records = self.records.read().await;
        Snapshot {
            profiles: records.profiles.values().cloned().collect(),
            classes: records.classes.values().cloned().collect(),
            questions: records.questions.clone(),
            books: records.books.clone(),
            quizzes: records.quizzes.values().cloned().collect(),
            attempts: records
                .attempt_order
                .iter()
                .filter_map(|id| records.attempts.get(id).cloned())
                .collect(),
            recommendations: records.recommendations.values().cloned().collect(),
        }
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let attempt_order = snapshot.attempts.iter().map(|a| a.id).collect();
        let records = Records {
            profiles: snapshot.profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            classes: snapshot.classes.into_iter().map(|c| (c.id.clone(), c)).collect(),
            questions: snapshot.questions,
            books: snapshot.books,
            quizzes: snapshot.quizzes.into_iter().map(|q| (q.id, q)).collect(),
            attempts: snapshot.attempts.into_iter().map(|a| (a.id, a)).collect(),
            attempt_order,
            recommendations: snapshot
                .recommendations
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
        };
        Self {
            records: RwLock::new(records),
        }
    }

    /// Serialize every record as pretty JSON.
    pub async fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot().await)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

#[async_trait]
impl TutorStore for MemoryStore {
    async fn get_profile(&self, student_id: &str) -> Result<Option<StudentProfile>> {
        Ok(self.records.read().await.profiles.get(student_id).cloned())
    }

    async fn put_profile(&self, profile: &StudentProfile) -> Result<()> {
        profile.validate()?;
        self.records
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn get_class(&self, class_id: &str) -> Result<Option<ClassProfile>> {
        Ok(self.records.read().await.classes.get(class_id).cloned())
    }

    async fn questions(&self) -> Result<Vec<QuizQuestion>> {
        Ok(self.records.read().await.questions.clone())
    }

    async fn books(&self) -> Result<Vec<Book>> {
        Ok(self.records.read().await.books.clone())
    }

    async fn get_quiz(&self, quiz_id: Uuid) -> Result<Option<PersonalizedQuiz>> {
        Ok(self.records.read().await.quizzes.get(&quiz_id).cloned())
    }

    async fn put_quiz(&self, quiz: &PersonalizedQuiz) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(stored) = records.quizzes.get(&quiz.id) {
            check_quiz_transition(quiz.id, stored.status, quiz.status)?;
        }
        records.quizzes.insert(quiz.id, quiz.clone());
        Ok(())
    }

    async fn update_quiz_status(&self, quiz_id: Uuid, status: QuizStatus) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.quizzes.get_mut(&quiz_id) {
            Some(quiz) => {
                check_quiz_transition(quiz_id, quiz.status, status)?;
                quiz.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizAttempt>> {
        Ok(self.records.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn append_attempt(&self, attempt: &QuizAttempt) -> Result<()> {
        let mut records = self.records.write().await;
        if records.attempts.contains_key(&attempt.id) {
            return Err(TutorError::AlreadyExists {
                entity: EntityKind::Attempt,
                id: attempt.id.to_string(),
            });
        }
        records.attempts.insert(attempt.id, attempt.clone());
        records.attempt_order.push(attempt.id);
        Ok(())
    }

    async fn put_attempt(&self, attempt: &QuizAttempt) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.attempts.contains_key(&attempt.id) {
            records.attempt_order.push(attempt.id);
        }
        records.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn attempts_for_student(&self, student_id: &str) -> Result<Vec<QuizAttempt>> {
        let records = self.records.read().await;
        let mut attempts: Vec<QuizAttempt> = records
            .attempt_order
            .iter()
            .filter_map(|id| records.attempts.get(id))
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        // Stable, so insertion order breaks ties.
        attempts.sort_by_key(|a| a.start_time);
        Ok(attempts)
    }

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<BookRecommendation>> {
        Ok(self.records.read().await.recommendations.get(&id).cloned())
    }

    async fn put_recommendation(&self, recommendation: &BookRecommendation) -> Result<()> {
        recommendation.validate()?;
        let mut records = self.records.write().await;
        if let Some(stored) = records.recommendations.get(&recommendation.id) {
            check_recommendation_transition(recommendation.id, stored.status, recommendation.status)?;
        }
        records
            .recommendations
            .insert(recommendation.id, recommendation.clone());
        Ok(())
    }

    async fn update_recommendation_status(
        &self,
        id: Uuid,
        status: RecommendationStatus,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.recommendations.get_mut(&id) {
            Some(r) => {
                check_recommendation_transition(id, r.status, status)?;
                r.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// Rewriting the current status is a no-op; anything else must be a forward move.
fn check_quiz_transition(id: Uuid, from: QuizStatus, to: QuizStatus) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TutorError::invalid_transition(EntityKind::Quiz, id, from, to))
    }
}

fn check_recommendation_transition(
    id: Uuid,
    from: RecommendationStatus,
    to: RecommendationStatus,
) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TutorError::invalid_transition(EntityKind::Recommendation, id, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use tutor_core::books::{recommend_books, BookRecommendationRequest, RecommenderConfig};
    use tutor_core::model::{Difficulty, DifficultyLevel, LearningStyle};
    use tutor_core::quiz::{generate_quiz, GeneratorConfig, QuizGenerationRequest};
    use tutor_core::ErrorKind;

    const CATALOG_DIR: &str = "../../catalogs";

    fn sample_store() -> MemoryStore {
        let config = TutorConfig {
            catalog_dir: Some(PathBuf::from(CATALOG_DIR)),
            ..TutorConfig::default()
        };
        MemoryStore::from_config(&config).unwrap()
    }

    fn fraction_request() -> BookRecommendationRequest {
        BookRecommendationRequest {
            student_id: "s1".into(),
            assessment_id: None,
            subject: "math".into(),
            topics: vec!["fractions".into()],
            difficulty: Difficulty::Medium,
            learning_style: LearningStyle::Visual,
            interests: vec![],
            language: None,
            budget: None,
            exclude_topics: vec![],
            max_recommendations: None,
        }
    }

    fn attempt(student: &str, hour: u32) -> QuizAttempt {
        QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            student_id: student.into(),
            subject: Some("math".into()),
            answers: vec![],
            total_questions: 1,
            score: 0,
            percentage: 0.0,
            time_spent_secs: 0,
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            end_time: None,
            completed: false,
            feedback: None,
        }
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get_profile("s1").await.unwrap().is_none());
        let profile = StudentProfile::new("s1", "Sam", LearningStyle::Text, DifficultyLevel::Beginner);
        store.put_profile(&profile).await.unwrap();
        assert_eq!(store.get_profile("s1").await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn invalid_profile_is_rejected() {
        let store = MemoryStore::new();
        let mut profile = StudentProfile::new("s1", "Sam", LearningStyle::Text, DifficultyLevel::Beginner);
        profile.average_score = 120.0;
        assert!(store.put_profile(&profile).await.is_err());
    }

    #[tokio::test]
    async fn attempts_are_chronological_and_per_student() {
        let store = MemoryStore::new();
        let late = attempt("s1", 12);
        let early = attempt("s1", 8);
        store.append_attempt(&late).await.unwrap();
        store.append_attempt(&early).await.unwrap();
        store.append_attempt(&attempt("s2", 9)).await.unwrap();

        let ids: Vec<Uuid> = store
            .attempts_for_student("s1")
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn duplicate_append_fails() {
        let store = MemoryStore::new();
        let a = attempt("s1", 8);
        store.append_attempt(&a).await.unwrap();
        let err = store.append_attempt(&a).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(!err.is_retryable());
        assert_eq!(store.attempts_for_student("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_update_on_missing_records() {
        let store = MemoryStore::new();
        assert!(!store.update_quiz_status(Uuid::new_v4(), QuizStatus::Expired).await.unwrap());
        assert!(!store
            .update_recommendation_status(Uuid::new_v4(), RecommendationStatus::Dismissed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn from_config_loads_the_catalog_dir() {
        let store = sample_store();
        assert_eq!(store.questions().await.unwrap().len(), 9);
        assert_eq!(store.books().await.unwrap().len(), 5);

        let empty = MemoryStore::from_config(&TutorConfig::default()).unwrap();
        assert!(empty.questions().await.unwrap().is_empty());
        assert!(empty.books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn from_config_with_an_empty_dir_gives_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = TutorConfig {
            catalog_dir: Some(dir.path().to_path_buf()),
            ..TutorConfig::default()
        };
        let store = MemoryStore::from_config(&config).unwrap();
        assert!(store.books().await.unwrap().is_empty());

        let missing = TutorConfig {
            catalog_dir: Some(dir.path().join("missing")),
            ..TutorConfig::default()
        };
        assert!(MemoryStore::from_config(&missing).is_err());
    }

    #[tokio::test]
    async fn quiz_status_only_moves_forward() {
        let store = sample_store();
        let profile = StudentProfile::new("s1", "Sam", LearningStyle::Visual, DifficultyLevel::Intermediate);
        let questions = store.questions().await.unwrap();
        let quiz = generate_quiz(
            &QuizGenerationRequest::new("s1", 2),
            &profile,
            &questions,
            &GeneratorConfig::default(),
            Utc::now(),
        )
        .unwrap()
        .quiz;
        store.put_quiz(&quiz).await.unwrap();

        assert!(store.update_quiz_status(quiz.id, QuizStatus::Expired).await.unwrap());
        assert!(store.update_quiz_status(quiz.id, QuizStatus::Expired).await.unwrap());
        let err = store
            .update_quiz_status(quiz.id, QuizStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::InvalidTransition { .. }));
        // Re-putting the pending copy would move the quiz backwards.
        assert!(store.put_quiz(&quiz).await.is_err());
        assert_eq!(
            store.get_quiz(quiz.id).await.unwrap().unwrap().status,
            QuizStatus::Expired
        );
    }

    #[tokio::test]
    async fn resolved_recommendations_stay_resolved() {
        let store = sample_store();
        let books = store.books().await.unwrap();
        let now = Utc::now();
        let active = recommend_books(&fraction_request(), &books, &RecommenderConfig::default(), now)
            .unwrap()
            .recommendation;
        store.put_recommendation(&active).await.unwrap();

        let mut purchased = active.clone();
        purchased.mark_purchased(now).unwrap();
        store.put_recommendation(&purchased).await.unwrap();

        // A writer that read the recommendation while it was still active.
        let mut dismissed = active.clone();
        dismissed.dismiss(now).unwrap();
        let err = store.put_recommendation(&dismissed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let err = store
            .update_recommendation_status(active.id, RecommendationStatus::Dismissed)
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::InvalidTransition { .. }));
        assert_eq!(
            store.get_recommendation(active.id).await.unwrap().unwrap().status,
            RecommendationStatus::Purchased
        );
    }

    #[tokio::test]
    async fn json_snapshot_restores_records() {
        let store = MemoryStore::new();
        let profile = StudentProfile::new("s1", "Sam", LearningStyle::Visual, DifficultyLevel::Advanced);
        store.put_profile(&profile).await.unwrap();
        let a = attempt("s1", 10);
        store.append_attempt(&a).await.unwrap();

        let json = store.to_json().await.unwrap();
        let restored = MemoryStore::from_json(&json).unwrap();
        assert_eq!(restored.get_profile("s1").await.unwrap(), Some(profile));
        assert_eq!(restored.get_attempt(a.id).await.unwrap(), Some(a));
    }
}
