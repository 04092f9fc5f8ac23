//! Tutor service orchestrator.
//!
//! Wires the pure generators and aggregators to a [`TutorStore`]. Operations
//! on one `(student_id, quiz_id)` pair are serialized, as are profile
//! read-modify-writes per student and status changes per recommendation.
//! Everything else runs in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use uuid::Uuid;

use crate::analytics::{
    compute_class_analytics, compute_quiz_analytics, ClassAnalyticsConfig, ClassQuizAnalytics,
    QuizAnalytics,
};
use crate::attempt::{AnswerSubmission, AttemptAnswer, AttemptSummary, QuizAttempt};
use crate::books::{
    recommend_books, request_from_attempt, BookRecommendation, BookRecommendationRequest,
    BookRecommendationResponse, RecommenderConfig,
};
use crate::error::{EntityKind, Result, TutorError};
use crate::model::{QuizStatus, StudentProfile};
use crate::quiz::{generate_quiz, GeneratorConfig, PersonalizedQuiz, QuizGenerationRequest, QuizGenerationResponse};
use crate::traits::TutorStore;

/// Configuration for the tutor service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub generator: GeneratorConfig,
    pub recommender: RecommenderConfig,
    pub class_analytics: ClassAnalyticsConfig,
    /// Maximum concurrent per-student folds in class analytics.
    pub parallelism: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            recommender: RecommenderConfig::default(),
            class_analytics: ClassAnalyticsConfig::default(),
            parallelism: 4,
        }
    }
}

/// Student action on an active recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
    Purchase,
    Dismiss,
}

/// Result of submitting one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub answer: AttemptAnswer,
    /// Set when this answer completed the quiz and the attempt was finalized.
    #[serde(default)]
    pub summary: Option<AttemptSummary>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One async mutex per key, created on demand.
///
/// Entries that no task holds or waits on are dropped on the next `lock`
/// call, so the map only tracks keys with work in flight.
struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(entries.entry(key).or_default())
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// The tutor service.
pub struct TutorService {
    store: Arc<dyn TutorStore>,
    config: ServiceConfig,
    clock: Clock,
    attempts: KeyedLocks<(String, Uuid)>,
    profiles: KeyedLocks<String>,
    recommendations: KeyedLocks<Uuid>,
}

impl TutorService {
    pub fn new(store: Arc<dyn TutorStore>, config: ServiceConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(Utc::now),
            attempts: KeyedLocks::new(),
            profiles: KeyedLocks::new(),
            recommendations: KeyedLocks::new(),
        }
    }

    /// Replace the wall clock, e.g. to test expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn lock_pair(&self, student_id: &str, quiz_id: Uuid) -> OwnedMutexGuard<()> {
        self.attempts.lock((student_id.to_string(), quiz_id)).await
    }

    /// Taken after the pair lock, never before it.
    async fn lock_profile(&self, student_id: &str) -> OwnedMutexGuard<()> {
        self.profiles.lock(student_id.to_string()).await
    }

    async fn profile(&self, student_id: &str) -> Result<StudentProfile> {
        self.store
            .get_profile(student_id)
            .await?
            .ok_or_else(|| TutorError::not_found(EntityKind::Student, student_id))
    }

    /// Load a quiz owned by `student_id`, persisting an expiry transition.
    async fn owned_quiz(&self, student_id: &str, quiz_id: Uuid) -> Result<PersonalizedQuiz> {
        let mut quiz = self
            .store
            .get_quiz(quiz_id)
            .await?
            .filter(|q| q.student_id == student_id)
            .ok_or_else(|| TutorError::not_found(EntityKind::Quiz, quiz_id))?;
        if quiz.refresh_status(self.now()) {
            self.store.update_quiz_status(quiz.id, quiz.status).await?;
            tracing::debug!(quiz = %quiz.id, "quiz expired");
        }
        Ok(quiz)
    }

    async fn owned_attempt(&self, student_id: &str, attempt_id: Uuid) -> Result<QuizAttempt> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .filter(|a| a.student_id == student_id)
            .ok_or_else(|| TutorError::not_found(EntityKind::Attempt, attempt_id))
    }

    // --- quizzes ---

    /// Generate and store a personalized quiz.
    pub async fn generate_quiz(&self, request: &QuizGenerationRequest) -> Result<QuizGenerationResponse> {
        let profile = self.profile(&request.student_id).await?;
        let catalog = self.store.questions().await?;
        let response = generate_quiz(request, &profile, &catalog, &self.config.generator, self.now())?;
        self.store.put_quiz(&response.quiz).await?;

        tracing::info!(
            student = %profile.id,
            quiz = %response.quiz.id,
            questions = response.quiz.total_questions(),
            confidence = response.metadata.confidence,
            "quiz generated"
        );
        Ok(response)
    }

    /// Fetch a quiz, applying expiry.
    pub async fn get_quiz(&self, student_id: &str, quiz_id: Uuid) -> Result<PersonalizedQuiz> {
        let _guard = self.lock_pair(student_id, quiz_id).await;
        self.owned_quiz(student_id, quiz_id).await
    }

    // --- attempts ---

    /// Open an attempt on a quiz and move the quiz to `in_progress`.
    ///
    /// Returns the existing open attempt if one is already running.
    pub async fn start_attempt(&self, student_id: &str, quiz_id: Uuid) -> Result<QuizAttempt> {
        let _guard = self.lock_pair(student_id, quiz_id).await;
        let now = self.now();
        let mut quiz = self.owned_quiz(student_id, quiz_id).await?;

        if quiz.status == QuizStatus::InProgress {
            let open = self
                .store
                .attempts_for_student(student_id)
                .await?
                .into_iter()
                .find(|a| a.quiz_id == quiz_id && !a.completed);
            if let Some(attempt) = open {
                return Ok(attempt);
            }
        }

        quiz.start(now)?;
        let attempt = QuizAttempt::start(&quiz, now);
        self.store.append_attempt(&attempt).await?;
        self.store.update_quiz_status(quiz.id, quiz.status).await?;

        tracing::debug!(student = student_id, quiz = %quiz_id, attempt = %attempt.id, "attempt started");
        Ok(attempt)
    }

    /// Grade one answer. The attempt is finalized once every question is answered.
    pub async fn submit_answer(
        &self,
        student_id: &str,
        attempt_id: Uuid,
        submission: &AnswerSubmission,
    ) -> Result<SubmitOutcome> {
        let quiz_id = self.owned_attempt(student_id, attempt_id).await?.quiz_id;
        let _guard = self.lock_pair(student_id, quiz_id).await;

        // Re-read under the lock so racing submissions see each other.
        let mut attempt = self.owned_attempt(student_id, attempt_id).await?;
        let quiz = self.owned_quiz(student_id, quiz_id).await?;
        if attempt.completed {
            return Err(TutorError::AlreadyFinalized {
                attempt_id: attempt.id.to_string(),
            });
        }
        if quiz.status == QuizStatus::Expired {
            return Err(TutorError::expired(EntityKind::Quiz, quiz.id));
        }

        let answer = attempt.submit_answer(&quiz, submission)?.clone();
        let summary = if attempt.is_fully_answered() {
            Some(self.close_attempt(&mut attempt, quiz).await?)
        } else {
            self.store.put_attempt(&attempt).await?;
            None
        };
        Ok(SubmitOutcome { answer, summary })
    }

    /// Finalize an attempt. Repeated calls return the stored summary.
    pub async fn finalize_attempt(&self, student_id: &str, attempt_id: Uuid) -> Result<AttemptSummary> {
        let quiz_id = self.owned_attempt(student_id, attempt_id).await?.quiz_id;
        let _guard = self.lock_pair(student_id, quiz_id).await;

        let mut attempt = self.owned_attempt(student_id, attempt_id).await?;
        if attempt.completed {
            return attempt.summary();
        }
        let quiz = self.owned_quiz(student_id, quiz_id).await?;
        self.close_attempt(&mut attempt, quiz).await
    }

    /// Score the attempt, settle the quiz status and fold the result into the
    /// profile. Must be called with the pair lock held.
    async fn close_attempt(
        &self,
        attempt: &mut QuizAttempt,
        mut quiz: PersonalizedQuiz,
    ) -> Result<AttemptSummary> {
        // Held across the attempt write and the profile update.
        let _profile = self.lock_profile(&attempt.student_id).await;
        let now = self.now();
        let summary = attempt.finalize(&quiz, now)?;
        self.store.put_attempt(attempt).await?;

        match quiz.complete(now) {
            Ok(()) => {}
            Err(TutorError::Expired { .. }) => {
                tracing::warn!(quiz = %quiz.id, attempt = %attempt.id, "attempt finalized after quiz expiry");
            }
            Err(e) => return Err(e),
        }
        self.store.update_quiz_status(quiz.id, quiz.status).await?;

        let mut profile = self.profile(&attempt.student_id).await?;
        profile.record_attempt(attempt);
        self.store.put_profile(&profile).await?;

        tracing::info!(
            student = %attempt.student_id,
            attempt = %attempt.id,
            percentage = summary.percentage,
            "attempt recorded"
        );
        Ok(summary)
    }

    // --- analytics ---

    /// Recompute a student's analytics and write the rolling stats to the profile.
    pub async fn student_analytics(&self, student_id: &str) -> Result<QuizAnalytics> {
        let _guard = self.lock_profile(student_id).await;
        let mut profile = self.profile(student_id).await?;
        let attempts = self.store.attempts_for_student(student_id).await?;
        let analytics = compute_quiz_analytics(student_id, &attempts);
        analytics.apply_to_profile(&mut profile);
        self.store.put_profile(&profile).await?;
        Ok(analytics)
    }

    /// Aggregate analytics for every student on a class roster.
    pub async fn class_analytics(&self, class_id: &str) -> Result<ClassQuizAnalytics> {
        let class = self
            .store
            .get_class(class_id)
            .await?
            .ok_or_else(|| TutorError::not_found(EntityKind::Class, class_id))?;
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));

        let mut futures = FuturesUnordered::new();
        for student_id in &class.student_ids {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let student_id = student_id.clone();

            futures.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TutorError::Storage("semaphore closed".into()))?;
                let attempts = store.attempts_for_student(&student_id).await?;
                Ok::<_, TutorError>(compute_quiz_analytics(&student_id, &attempts))
            });
        }

        let mut per_student = Vec::with_capacity(class.student_ids.len());
        while let Some(result) = futures.next().await {
            per_student.push(result?);
        }

        let analytics = compute_class_analytics(&class, &per_student, &self.config.class_analytics);
        tracing::debug!(
            class = class_id,
            students = analytics.student_count,
            active = analytics.active_students,
            "class analytics computed"
        );
        Ok(analytics)
    }

    // --- recommendations ---

    /// Rank books for a request and store the recommendation.
    pub async fn recommend_books(
        &self,
        request: &BookRecommendationRequest,
    ) -> Result<BookRecommendationResponse> {
        self.profile(&request.student_id).await?;
        let catalog = self.store.books().await?;
        let response = recommend_books(request, &catalog, &self.config.recommender, self.now())?;
        self.store.put_recommendation(&response.recommendation).await?;

        tracing::info!(
            student = %request.student_id,
            recommendation = %response.recommendation.id,
            books = response.recommendation.books.len(),
            priority = %response.recommendation.priority,
            "books recommended"
        );
        Ok(response)
    }

    /// Recommend books for the topics a finalized attempt flagged for improvement.
    ///
    /// Returns `Ok(None)` when the attempt has nothing to improve on.
    pub async fn recommend_for_attempt(
        &self,
        student_id: &str,
        attempt_id: Uuid,
    ) -> Result<Option<BookRecommendationResponse>> {
        let attempt = self.owned_attempt(student_id, attempt_id).await?;
        if !attempt.completed {
            return Err(TutorError::validation(
                "attempt_id",
                format!("attempt {attempt_id} is not finalized"),
            ));
        }
        let profile = self.profile(student_id).await?;
        match request_from_attempt(&profile, &attempt) {
            Some(request) => self.recommend_books(&request).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fetch a recommendation, applying expiry.
    pub async fn get_recommendation(&self, id: Uuid) -> Result<BookRecommendation> {
        let _guard = self.recommendations.lock(id).await;
        self.load_recommendation(id).await
    }

    async fn load_recommendation(&self, id: Uuid) -> Result<BookRecommendation> {
        let mut recommendation = self
            .store
            .get_recommendation(id)
            .await?
            .ok_or_else(|| TutorError::not_found(EntityKind::Recommendation, id))?;
        let before = recommendation.status;
        if recommendation.evaluate_status(self.now()) != before {
            self.store
                .update_recommendation_status(id, recommendation.status)
                .await?;
        }
        Ok(recommendation)
    }

    /// Record a purchase or dismissal on an active recommendation.
    pub async fn update_recommendation(
        &self,
        id: Uuid,
        action: RecommendationAction,
    ) -> Result<BookRecommendation> {
        let _guard = self.recommendations.lock(id).await;
        let mut recommendation = self.load_recommendation(id).await?;
        let now = self.now();
        match action {
            RecommendationAction::Purchase => recommendation.mark_purchased(now)?,
            RecommendationAction::Dismiss => recommendation.dismiss(now)?,
        }
        self.store.put_recommendation(&recommendation).await?;
        Ok(recommendation)
    }
}
