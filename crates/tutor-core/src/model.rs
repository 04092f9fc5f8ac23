//! Core data model: closed enumerations, learner profiles and catalog questions.
//!
//! These are the input facts every generator in the crate consumes. Quiz,
//! attempt and book records live next to the component that produces them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attempt::QuizAttempt;
use crate::error::{Result, TutorError};

/// Difficulty tag on a catalog question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// The learner level this question difficulty is pitched at.
    pub fn learner_level(self) -> DifficultyLevel {
        match self {
            Difficulty::Easy => DifficultyLevel::Beginner,
            Difficulty::Medium => DifficultyLevel::Intermediate,
            Difficulty::Hard => DifficultyLevel::Advanced,
        }
    }

    /// One step down, saturating at `Easy`.
    pub fn easier(self) -> Difficulty {
        match self {
            Difficulty::Easy | Difficulty::Medium => Difficulty::Easy,
            Difficulty::Hard => Difficulty::Medium,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Self-assessed or inferred level of a learner.
///
/// Maps one-to-one onto [`Difficulty`]: beginner is easy, intermediate is
/// medium, advanced is hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    /// The question difficulty a learner at this level should mostly see.
    pub fn target_difficulty(self) -> Difficulty {
        match self {
            DifficultyLevel::Beginner => Difficulty::Easy,
            DifficultyLevel::Intermediate => Difficulty::Medium,
            DifficultyLevel::Advanced => Difficulty::Hard,
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifficultyLevel::Beginner => write!(f, "beginner"),
            DifficultyLevel::Intermediate => write!(f, "intermediate"),
            DifficultyLevel::Advanced => write!(f, "advanced"),
        }
    }
}

impl FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" => Ok(DifficultyLevel::Beginner),
            "intermediate" => Ok(DifficultyLevel::Intermediate),
            "advanced" => Ok(DifficultyLevel::Advanced),
            other => Err(format!("unknown difficulty level: {other}")),
        }
    }
}

/// Difficulty requested when generating a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizDifficulty {
    Easy,
    Medium,
    Hard,
    /// Pitch questions at the learner's level, weighted toward weak areas.
    Adaptive,
}

impl QuizDifficulty {
    /// The fixed question difficulty, or `None` for adaptive requests.
    pub fn fixed(self) -> Option<Difficulty> {
        match self {
            QuizDifficulty::Easy => Some(Difficulty::Easy),
            QuizDifficulty::Medium => Some(Difficulty::Medium),
            QuizDifficulty::Hard => Some(Difficulty::Hard),
            QuizDifficulty::Adaptive => None,
        }
    }
}

impl From<Difficulty> for QuizDifficulty {
    fn from(d: Difficulty) -> Self {
        match d {
            Difficulty::Easy => QuizDifficulty::Easy,
            Difficulty::Medium => QuizDifficulty::Medium,
            Difficulty::Hard => QuizDifficulty::Hard,
        }
    }
}

impl fmt::Display for QuizDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fixed() {
            Some(d) => write!(f, "{d}"),
            None => write!(f, "adaptive"),
        }
    }
}

impl FromStr for QuizDifficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("adaptive") {
            return Ok(QuizDifficulty::Adaptive);
        }
        s.parse::<Difficulty>().map(QuizDifficulty::from)
    }
}

/// Preferred learning modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    Visual,
    Text,
    Kinesthetic,
    Auditory,
}

impl fmt::Display for LearningStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningStyle::Visual => write!(f, "visual"),
            LearningStyle::Text => write!(f, "text"),
            LearningStyle::Kinesthetic => write!(f, "kinesthetic"),
            LearningStyle::Auditory => write!(f, "auditory"),
        }
    }
}

impl FromStr for LearningStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visual" => Ok(LearningStyle::Visual),
            "text" | "reading" => Ok(LearningStyle::Text),
            "kinesthetic" | "hands-on" => Ok(LearningStyle::Kinesthetic),
            "auditory" | "audio" => Ok(LearningStyle::Auditory),
            other => Err(format!("unknown learning style: {other}")),
        }
    }
}

/// Lifecycle of a personalized quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Pending,
    InProgress,
    Completed,
    Expired,
}

impl QuizStatus {
    /// Transitions only move forward: `pending -> in_progress -> completed`,
    /// with `expired` reachable from either non-terminal state.
    pub fn can_transition_to(self, next: QuizStatus) -> bool {
        matches!(
            (self, next),
            (QuizStatus::Pending, QuizStatus::InProgress)
                | (QuizStatus::Pending, QuizStatus::Expired)
                | (QuizStatus::InProgress, QuizStatus::Completed)
                | (QuizStatus::InProgress, QuizStatus::Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QuizStatus::Completed | QuizStatus::Expired)
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuizStatus::Pending => write!(f, "pending"),
            QuizStatus::InProgress => write!(f, "in_progress"),
            QuizStatus::Completed => write!(f, "completed"),
            QuizStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Lifecycle of a book recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Active,
    Purchased,
    Expired,
    Dismissed,
}

impl RecommendationStatus {
    pub fn can_transition_to(self, next: RecommendationStatus) -> bool {
        self == RecommendationStatus::Active && next != RecommendationStatus::Active
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationStatus::Active => write!(f, "active"),
            RecommendationStatus::Purchased => write!(f, "purchased"),
            RecommendationStatus::Expired => write!(f, "expired"),
            RecommendationStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// Urgency attached to a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Store an affiliate link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Amazon,
    BarnesNoble,
    BookDepository,
    Google,
    Apple,
    Other,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Amazon => write!(f, "amazon"),
            Platform::BarnesNoble => write!(f, "barnes_noble"),
            Platform::BookDepository => write!(f, "book_depository"),
            Platform::Google => write!(f, "google"),
            Platform::Apple => write!(f, "apple"),
            Platform::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amazon" => Ok(Platform::Amazon),
            "barnes_noble" | "barnesnoble" | "barnes-noble" => Ok(Platform::BarnesNoble),
            "book_depository" | "bookdepository" => Ok(Platform::BookDepository),
            "google" | "google_books" => Ok(Platform::Google),
            "apple" | "apple_books" => Ok(Platform::Apple),
            "other" => Ok(Platform::Other),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Identity and learning metadata for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub interests: Vec<String>,
    pub learning_style: LearningStyle,
    pub difficulty_level: DifficultyLevel,
    #[serde(default)]
    pub weak_areas: Vec<String>,
    #[serde(default)]
    pub strong_areas: Vec<String>,
    #[serde(default)]
    pub preferred_subjects: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub total_quizzes_completed: u32,
    /// Rolling mean of finalized attempt percentages, in `[0, 100]`.
    #[serde(default)]
    pub average_score: f64,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

fn default_language() -> String {
    "en".to_string()
}

impl StudentProfile {
    /// A fresh profile with no activity.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        learning_style: LearningStyle,
        difficulty_level: DifficultyLevel,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            grade: None,
            interests: Vec::new(),
            learning_style,
            difficulty_level,
            weak_areas: Vec::new(),
            strong_areas: Vec::new(),
            preferred_subjects: Vec::new(),
            language: default_language(),
            total_quizzes_completed: 0,
            average_score: 0.0,
            last_active: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TutorError::validation("id", "student id is empty"));
        }
        if !(0.0..=100.0).contains(&self.average_score) {
            return Err(TutorError::validation(
                "average_score",
                format!("{} is outside [0, 100]", self.average_score),
            ));
        }
        Ok(())
    }

    /// Fold one finalized attempt into the activity stats and topic areas.
    ///
    /// Unfinalized attempts are ignored.
    pub fn record_attempt(&mut self, attempt: &QuizAttempt) {
        if !attempt.completed {
            return;
        }
        let n = self.total_quizzes_completed as f64;
        self.average_score =
            ((self.average_score * n + attempt.percentage) / (n + 1.0)).clamp(0.0, 100.0);
        self.total_quizzes_completed += 1;
        self.last_active = attempt.end_time.or(Some(attempt.start_time));

        if let Some(feedback) = &attempt.feedback {
            for topic in &feedback.improvements {
                self.strong_areas.retain(|t| t != topic);
                if !self.weak_areas.contains(topic) {
                    self.weak_areas.push(topic.clone());
                }
            }
            for topic in &feedback.strengths {
                self.weak_areas.retain(|t| t != topic);
                if !self.strong_areas.contains(topic) {
                    self.strong_areas.push(topic.clone());
                }
            }
        }
    }
}

/// A class roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

/// Explanation shown after a question is answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub text: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// An immutable catalog question with exactly one correct option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_answer: usize,
    pub subject: String,
    pub topic: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub explanation: Explanation,
    /// Styles this question suits; empty means any.
    #[serde(default)]
    pub learning_styles: Vec<LearningStyle>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

impl QuizQuestion {
    pub fn validate(&self) -> Result<()> {
        if self.options.len() < 2 {
            return Err(TutorError::validation(
                format!("questions[{}].options", self.id),
                "at least two options are required",
            ));
        }
        if self.correct_answer >= self.options.len() {
            return Err(TutorError::validation(
                format!("questions[{}].correct_answer", self.id),
                format!(
                    "index {} is out of range for {} options",
                    self.correct_answer,
                    self.options.len()
                ),
            ));
        }
        Ok(())
    }

    pub fn is_correct(&self, selected: usize) -> bool {
        selected == self.correct_answer
    }

    pub fn suits(&self, style: LearningStyle) -> bool {
        self.learning_styles.is_empty() || self.learning_styles.contains(&style)
    }
}

/// Case-insensitive topic membership.
pub(crate) fn contains_topic(topics: &[String], topic: &str) -> bool {
    topics.iter().any(|t| t.eq_ignore_ascii_case(topic))
}
