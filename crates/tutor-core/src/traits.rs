//! Storage trait for profiles, quizzes, attempts and recommendations.
//!
//! The generators and aggregators in this crate are pure functions over
//! snapshots. This trait is the only seam through which records are read
//! and written, and is implemented by the `tutor-store` crate.

use async_trait::async_trait;
use uuid::Uuid;

use crate::attempt::QuizAttempt;
use crate::books::{Book, BookRecommendation};
use crate::error::Result;
use crate::model::{ClassProfile, QuizQuestion, QuizStatus, RecommendationStatus, StudentProfile};
use crate::quiz::PersonalizedQuiz;

/// Narrow read/write interface over the persistence collaborator.
///
/// `get_*` methods return `Ok(None)` for missing records; callers turn that
/// into a `NotFound` error with context.
#[async_trait]
pub trait TutorStore: Send + Sync {
    // --- profiles ---

    async fn get_profile(&self, student_id: &str) -> Result<Option<StudentProfile>>;

    async fn put_profile(&self, profile: &StudentProfile) -> Result<()>;

    async fn get_class(&self, class_id: &str) -> Result<Option<ClassProfile>>;

    // --- catalogs ---

    async fn questions(&self) -> Result<Vec<QuizQuestion>>;

    async fn books(&self) -> Result<Vec<Book>>;

    // --- quizzes ---

    async fn get_quiz(&self, quiz_id: Uuid) -> Result<Option<PersonalizedQuiz>>;

    /// Insert or replace a quiz. Replacing must not move its status backwards.
    async fn put_quiz(&self, quiz: &PersonalizedQuiz) -> Result<()>;

    /// Returns `false` if the quiz does not exist.
    ///
    /// The change is checked against the stored status under the store's own
    /// write lock; an illegal move fails with `InvalidTransition`. Writing the
    /// current status again succeeds.
    async fn update_quiz_status(&self, quiz_id: Uuid, status: QuizStatus) -> Result<bool>;

    // --- attempts ---

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizAttempt>>;

    /// Store a new attempt. Fails with `AlreadyExists` if the id is present.
    async fn append_attempt(&self, attempt: &QuizAttempt) -> Result<()>;

    /// Replace an existing attempt.
    async fn put_attempt(&self, attempt: &QuizAttempt) -> Result<()>;

    /// All attempts for a student, oldest first.
    async fn attempts_for_student(&self, student_id: &str) -> Result<Vec<QuizAttempt>>;

    // --- recommendations ---

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<BookRecommendation>>;

    /// Insert or replace a recommendation. Replacing is held to the same
    /// transition rule as `update_recommendation_status`.
    async fn put_recommendation(&self, recommendation: &BookRecommendation) -> Result<()>;

    /// Returns `false` if the recommendation does not exist. Fails with
    /// `InvalidTransition` when the stored status cannot move to `status`.
    async fn update_recommendation_status(
        &self,
        id: Uuid,
        status: RecommendationStatus,
    ) -> Result<bool>;
}
