//! Book catalog and the book recommendation generator.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attempt::QuizAttempt;
use crate::error::{EntityKind, Result, TutorError};
use crate::model::{
    contains_topic, Difficulty, LearningStyle, Platform, Priority, RecommendationStatus,
    StudentProfile,
};

/// Name recorded in [`RecommendationMetadata::algorithm`].
pub const BOOK_ALGORITHM: &str = "composite-rank-v1";

/// Commission paid on a purchase through an affiliate link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    /// Share of the sale amount, in `[0, 100]`.
    pub percentage: f64,
    #[serde(default)]
    pub fixed_amount: Option<f64>,
}

impl Commission {
    pub fn amount_for(&self, sale: f64) -> f64 {
        sale * self.percentage / 100.0 + self.fixed_amount.unwrap_or(0.0)
    }
}

/// A purchase link for one book on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateLink {
    pub id: String,
    pub book_id: String,
    pub platform: Platform,
    pub url: String,
    pub tracking_id: String,
    #[serde(default)]
    pub commission: Commission,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl AffiliateLink {
    /// Active and not past its expiry at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| now < exp)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.commission.percentage) {
            return Err(TutorError::validation(
                format!("links[{}].commission.percentage", self.id),
                format!("{} is outside [0, 100]", self.commission.percentage),
            ));
        }
        if self.commission.fixed_amount.is_some_and(|a| a < 0.0) {
            return Err(TutorError::validation(
                format!("links[{}].commission.fixed_amount", self.id),
                "must not be negative",
            ));
        }
        if self.tracking_id.trim().is_empty() {
            return Err(TutorError::validation(
                format!("links[{}].tracking_id", self.id),
                "is empty",
            ));
        }
        Ok(())
    }
}

/// Reject two active links for the same `(book_id, platform)` pair.
pub fn check_unique_active_links<'a>(links: impl IntoIterator<Item = &'a AffiliateLink>) -> Result<()> {
    let mut seen = HashSet::new();
    for link in links.into_iter().filter(|l| l.is_active) {
        if !seen.insert((link.book_id.as_str(), link.platform)) {
            return Err(TutorError::validation(
                format!("links[{}]", link.id),
                format!(
                    "book {} already has an active {} link",
                    link.book_id, link.platform
                ),
            ));
        }
    }
    Ok(())
}

/// A catalog book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub isbn: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub difficulty: Difficulty,
    #[serde(default = "default_language")]
    pub language: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Average review rating in `[0, 5]`.
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub learning_styles: Vec<LearningStyle>,
    #[serde(default)]
    pub affiliate_links: Vec<AffiliateLink>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Book {
    pub fn validate(&self) -> Result<()> {
        if self.price < 0.0 {
            return Err(TutorError::validation(
                format!("books[{}].price", self.id),
                "must not be negative",
            ));
        }
        if !(0.0..=5.0).contains(&self.rating) {
            return Err(TutorError::validation(
                format!("books[{}].rating", self.id),
                format!("{} is outside [0, 5]", self.rating),
            ));
        }
        for link in &self.affiliate_links {
            link.validate()?;
            if link.book_id != self.id {
                return Err(TutorError::validation(
                    format!("links[{}].book_id", link.id),
                    format!("link is nested under book {}", self.id),
                ));
            }
        }
        check_unique_active_links(&self.affiliate_links)
    }

    /// Fraction of `topics` this book covers.
    pub fn topic_ratio(&self, topics: &[String]) -> f64 {
        if topics.is_empty() {
            return 1.0;
        }
        let hits = topics
            .iter()
            .filter(|t| contains_topic(&self.topics, t))
            .count();
        hits as f64 / topics.len() as f64
    }

    fn covers_any(&self, topics: &[String]) -> bool {
        topics.iter().any(|t| contains_topic(&self.topics, t))
    }
}

/// Tuning knobs for book recommendations.
#[derive(Debug, Clone)]
pub struct RecommenderConfig {
    pub topic_weight: f64,
    pub rating_weight: f64,
    pub price_weight: f64,
    /// Bonus for a book explicitly tagged with the learner's style.
    pub learning_style_weight: f64,
    /// Bonus for a book whose topics hit a learner interest.
    pub interest_weight: f64,
    /// Used when the request leaves `max_recommendations` unset.
    pub default_max_recommendations: usize,
    /// How long a recommendation stays active.
    pub horizon: Duration,
    pub high_priority_threshold: f64,
    pub medium_priority_threshold: f64,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            topic_weight: 0.5,
            rating_weight: 0.3,
            price_weight: 0.2,
            learning_style_weight: 0.05,
            interest_weight: 0.05,
            default_max_recommendations: 3,
            horizon: Duration::days(30),
            high_priority_threshold: 0.75,
            medium_priority_threshold: 0.4,
        }
    }
}

impl RecommenderConfig {
    pub fn priority_for(&self, confidence: f64) -> Priority {
        if confidence >= self.high_priority_threshold {
            Priority::High
        } else if confidence >= self.medium_priority_threshold {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Inbound request for book recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecommendationRequest {
    pub student_id: String,
    /// The attempt whose results prompted this request, if any.
    #[serde(default)]
    pub assessment_id: Option<Uuid>,
    pub subject: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub difficulty: Difficulty,
    pub learning_style: LearningStyle,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub exclude_topics: Vec<String>,
    #[serde(default)]
    pub max_recommendations: Option<usize>,
}

impl BookRecommendationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.student_id.trim().is_empty() {
            return Err(TutorError::validation("student_id", "is empty"));
        }
        if self.subject.trim().is_empty() {
            return Err(TutorError::validation("subject", "is empty"));
        }
        if self.budget.is_some_and(|b| b < 0.0) {
            return Err(TutorError::validation("budget", "must not be negative"));
        }
        if self.max_recommendations == Some(0) {
            return Err(TutorError::validation(
                "max_recommendations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Derive a request from a finalized attempt's weak topics.
///
/// Returns `None` when the attempt has nothing to improve on.
pub fn request_from_attempt(
    profile: &StudentProfile,
    attempt: &QuizAttempt,
) -> Option<BookRecommendationRequest> {
    let feedback = attempt.feedback.as_ref()?;
    if feedback.improvements.is_empty() {
        return None;
    }
    let subject = attempt
        .subject
        .clone()
        .or_else(|| profile.preferred_subjects.first().cloned())?;
    Some(BookRecommendationRequest {
        student_id: profile.id.clone(),
        assessment_id: Some(attempt.id),
        subject,
        topics: feedback.improvements.clone(),
        difficulty: profile.difficulty_level.target_difficulty(),
        learning_style: profile.learning_style,
        interests: profile.interests.clone(),
        language: Some(profile.language.clone()),
        budget: None,
        exclude_topics: Vec::new(),
        max_recommendations: None,
    })
}

/// A ranked book within a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedBook {
    pub book_id: String,
    pub title: String,
    pub score: f64,
    pub topic_match: f64,
    pub matched_topics: Vec<String>,
    pub reason: String,
}

/// A ranked set of books for one student and assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecommendation {
    pub id: Uuid,
    pub student_id: String,
    #[serde(default)]
    pub assessment_id: Option<Uuid>,
    pub subject: String,
    pub books: Vec<RecommendedBook>,
    #[serde(default)]
    pub alternatives: Vec<RecommendedBook>,
    pub priority: Priority,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl BookRecommendation {
    /// Mark the recommendation expired if still active at or past `expires_at`.
    ///
    /// Returns the status after evaluation.
    pub fn evaluate_status(&mut self, now: DateTime<Utc>) -> RecommendationStatus {
        if self.status == RecommendationStatus::Active && now >= self.expires_at {
            self.status = RecommendationStatus::Expired;
            self.resolved_at = Some(now);
        }
        self.status
    }

    pub fn mark_purchased(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.resolve(RecommendationStatus::Purchased, now)
    }

    pub fn dismiss(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.resolve(RecommendationStatus::Dismissed, now)
    }

    fn resolve(&mut self, next: RecommendationStatus, now: DateTime<Utc>) -> Result<()> {
        if self.evaluate_status(now) == RecommendationStatus::Expired {
            return Err(TutorError::expired(EntityKind::Recommendation, self.id));
        }
        if !self.status.can_transition_to(next) {
            return Err(TutorError::invalid_transition(
                EntityKind::Recommendation,
                self.id,
                self.status,
                next,
            ));
        }
        self.status = next;
        self.resolved_at = Some(now);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.expires_at < self.created_at {
            return Err(TutorError::validation(
                "expires_at",
                format!("recommendation {} expires before it was created", self.id),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetadata {
    pub generation_time_ms: u64,
    pub algorithm: String,
    /// Best topic coverage among the primary books, in `[0, 1]`.
    pub confidence: f64,
    pub candidates_considered: usize,
}

/// Outbound wrapper for a recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecommendationResponse {
    pub success: bool,
    pub recommendation: BookRecommendation,
    pub metadata: RecommendationMetadata,
}

/// 1.0 within budget, falling linearly to 0.0 at twice the budget.
pub fn price_fit(price: f64, budget: Option<f64>) -> f64 {
    match budget {
        None => 1.0,
        Some(b) if price <= b => 1.0,
        Some(b) if b <= 0.0 => 0.0,
        Some(b) => (1.0 - (price - b) / b).max(0.0),
    }
}

/// Filter and rank `catalog` for `request`.
pub fn recommend_books(
    request: &BookRecommendationRequest,
    catalog: &[Book],
    config: &RecommenderConfig,
    now: DateTime<Utc>,
) -> Result<BookRecommendationResponse> {
    let started = Instant::now();
    request.validate()?;

    let candidates: Vec<&Book> = catalog
        .iter()
        .filter(|b| b.subject.eq_ignore_ascii_case(&request.subject))
        .filter(|b| request.topics.is_empty() || b.covers_any(&request.topics))
        .filter(|b| b.difficulty == request.difficulty)
        .filter(|b| {
            request
                .language
                .as_deref()
                .map_or(true, |l| b.language.eq_ignore_ascii_case(l))
        })
        .filter(|b| !b.covers_any(&request.exclude_topics))
        .collect();

    if candidates.is_empty() {
        return Err(TutorError::InsufficientCatalog {
            requested: 1,
            available: 0,
            constraint: format!(
                "subject={}, difficulty={}, topics={}",
                request.subject,
                request.difficulty,
                request.topics.join("|")
            ),
        });
    }

    let mut ranked: Vec<RecommendedBook> = candidates
        .iter()
        .map(|b| score_book(b, request, config))
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.book_id.cmp(&b.book_id))
    });

    let max = request
        .max_recommendations
        .unwrap_or(config.default_max_recommendations)
        .max(1);
    let alternatives: Vec<RecommendedBook> = ranked.iter().skip(max).take(max).cloned().collect();
    ranked.truncate(max);

    let expires_at = now.checked_add_signed(config.horizon).ok_or_else(|| {
        TutorError::validation("horizon", format!("{} is out of range", config.horizon))
    })?;

    let confidence = ranked.iter().map(|b| b.topic_match).fold(0.0, f64::max);
    let recommendation = BookRecommendation {
        id: Uuid::new_v4(),
        student_id: request.student_id.clone(),
        assessment_id: request.assessment_id,
        subject: request.subject.clone(),
        books: ranked,
        alternatives,
        priority: config.priority_for(confidence),
        status: RecommendationStatus::Active,
        created_at: now,
        expires_at,
        resolved_at: None,
    };

    tracing::debug!(
        student = %request.student_id,
        recommendation = %recommendation.id,
        books = recommendation.books.len(),
        priority = %recommendation.priority,
        "generated book recommendation"
    );

    Ok(BookRecommendationResponse {
        success: true,
        recommendation,
        metadata: RecommendationMetadata {
            generation_time_ms: started.elapsed().as_millis() as u64,
            algorithm: BOOK_ALGORITHM.to_string(),
            confidence,
            candidates_considered: candidates.len(),
        },
    })
}

fn score_book(book: &Book, request: &BookRecommendationRequest, config: &RecommenderConfig) -> RecommendedBook {
    let topic_match = book.topic_ratio(&request.topics);
    let rating = (book.rating / 5.0).clamp(0.0, 1.0);
    let fit = price_fit(book.price, request.budget);
    let mut score =
        config.topic_weight * topic_match + config.rating_weight * rating + config.price_weight * fit;
    if book.learning_styles.contains(&request.learning_style) {
        score += config.learning_style_weight;
    }
    if book.covers_any(&request.interests) {
        score += config.interest_weight;
    }

    let matched_topics: Vec<String> = request
        .topics
        .iter()
        .filter(|t| contains_topic(&book.topics, t))
        .cloned()
        .collect();
    let reason = if matched_topics.is_empty() {
        format!("Rated {:.1}/5 for {}", book.rating, book.subject)
    } else {
        format!("Covers {}", matched_topics.join(", "))
    };

    RecommendedBook {
        book_id: book.id.clone(),
        title: book.title.clone(),
        score,
        topic_match,
        matched_topics,
        reason,
    }
}

/// A student's saved books. Holds catalog ids only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingList {
    pub id: Uuid,
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub book_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReadingList {
    pub fn new(student_id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            name: name.into(),
            book_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `false` if the book was already listed.
    pub fn add_book(&mut self, book_id: impl Into<String>, now: DateTime<Utc>) -> bool {
        let book_id = book_id.into();
        if self.book_ids.contains(&book_id) {
            return false;
        }
        self.book_ids.push(book_id);
        self.updated_at = now;
        true
    }

    /// Returns `false` if the book was not listed.
    pub fn remove_book(&mut self, book_id: &str, now: DateTime<Utc>) -> bool {
        let before = self.book_ids.len();
        self.book_ids.retain(|id| id != book_id);
        if self.book_ids.len() == before {
            return false;
        }
        self.updated_at = now;
        true
    }
}

/// A student's review of a catalog book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookReview {
    pub id: Uuid,
    pub student_id: String,
    pub book_id: String,
    /// 1 to 5 stars.
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl BookReview {
    pub fn new(
        student_id: impl Into<String>,
        book_id: impl Into<String>,
        rating: u8,
        comment: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !(1..=5).contains(&rating) {
            return Err(TutorError::validation(
                "rating",
                format!("{rating} is outside 1..=5"),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            book_id: book_id.into(),
            rating,
            comment: comment.into(),
            created_at: now,
        })
    }
}
