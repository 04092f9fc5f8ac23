//! Attempt recorder: collects answers against a quiz and derives the score.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EntityKind, Result, TutorError};
use crate::quiz::PersonalizedQuiz;

/// One answer submitted by the student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: String,
    /// Index into the question's options.
    pub selected_answer: usize,
    #[serde(default)]
    pub time_spent_secs: u64,
}

impl AnswerSubmission {
    pub fn new(question_id: impl Into<String>, selected_answer: usize, time_spent_secs: u64) -> Self {
        Self {
            question_id: question_id.into(),
            selected_answer,
            time_spent_secs,
        }
    }
}

/// A recorded answer, graded against the quiz snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptAnswer {
    pub question_id: String,
    pub topic: String,
    pub selected_answer: usize,
    pub is_correct: bool,
    pub time_spent_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptFeedback {
    /// Topics where every question was answered correctly.
    pub strengths: Vec<String>,
    /// Topics with at least one incorrect or missing answer.
    pub improvements: Vec<String>,
    pub message: String,
}

/// The derived figures of a finalized attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub score: u32,
    pub total_questions: u32,
    pub percentage: f64,
    pub time_spent_secs: u64,
    pub feedback: AttemptFeedback,
}

/// One attempt at one personalized quiz.
///
/// `score`, `percentage`, `time_spent_secs` and `feedback` are derived at
/// finalization and never set by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub answers: Vec<AttemptAnswer>,
    pub total_questions: u32,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub time_spent_secs: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub feedback: Option<AttemptFeedback>,
}

impl QuizAttempt {
    /// Open a new attempt against `quiz`.
    pub fn start(quiz: &PersonalizedQuiz, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            student_id: quiz.student_id.clone(),
            subject: quiz.subject.clone(),
            answers: Vec::new(),
            total_questions: quiz.total_questions() as u32,
            score: 0,
            percentage: 0.0,
            time_spent_secs: 0,
            start_time: now,
            end_time: None,
            completed: false,
            feedback: None,
        }
    }

    pub fn is_fully_answered(&self) -> bool {
        self.answers.len() as u32 >= self.total_questions
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        self.answers.iter().any(|a| a.question_id == question_id)
    }

    /// Grade and record one answer.
    pub fn submit_answer(
        &mut self,
        quiz: &PersonalizedQuiz,
        submission: &AnswerSubmission,
    ) -> Result<&AttemptAnswer> {
        self.check_quiz(quiz)?;
        if self.completed {
            return Err(TutorError::AlreadyFinalized {
                attempt_id: self.id.to_string(),
            });
        }
        let question = quiz
            .question(&submission.question_id)
            .ok_or_else(|| TutorError::not_found(EntityKind::Question, &submission.question_id))?;
        if self.is_answered(&question.id) {
            return Err(TutorError::DuplicateAnswer {
                attempt_id: self.id.to_string(),
                question_id: question.id.clone(),
            });
        }
        if submission.selected_answer >= question.options.len() {
            return Err(TutorError::validation(
                "selected_answer",
                format!(
                    "index {} is out of range for question {} with {} options",
                    submission.selected_answer,
                    question.id,
                    question.options.len()
                ),
            ));
        }

        self.answers.push(AttemptAnswer {
            question_id: question.id.clone(),
            topic: question.topic.clone(),
            selected_answer: submission.selected_answer,
            is_correct: question.is_correct(submission.selected_answer),
            time_spent_secs: submission.time_spent_secs,
        });
        let index = self.answers.len() - 1;
        Ok(&self.answers[index])
    }

    /// Derive score, percentage, time spent and feedback, and close the attempt.
    ///
    /// Unanswered questions count as incorrect. Calling this again returns the
    /// stored result unchanged.
    pub fn finalize(&mut self, quiz: &PersonalizedQuiz, now: DateTime<Utc>) -> Result<AttemptSummary> {
        self.check_quiz(quiz)?;
        if self.completed {
            return self.summary();
        }

        let score = self.answers.iter().filter(|a| a.is_correct).count() as u32;
        self.score = score;
        self.percentage = if self.total_questions == 0 {
            0.0
        } else {
            100.0 * score as f64 / self.total_questions as f64
        };
        self.time_spent_secs = self.answers.iter().map(|a| a.time_spent_secs).sum();
        self.feedback = Some(self.derive_feedback(quiz));
        self.end_time = Some(now);
        self.completed = true;

        tracing::debug!(
            attempt = %self.id,
            quiz = %self.quiz_id,
            score = self.score,
            percentage = self.percentage,
            "attempt finalized"
        );
        self.summary()
    }

    /// The stored result of a finalized attempt.
    pub fn summary(&self) -> Result<AttemptSummary> {
        match (&self.feedback, self.completed) {
            (Some(feedback), true) => Ok(AttemptSummary {
                attempt_id: self.id,
                score: self.score,
                total_questions: self.total_questions,
                percentage: self.percentage,
                time_spent_secs: self.time_spent_secs,
                feedback: feedback.clone(),
            }),
            _ => Err(TutorError::validation(
                "attempt",
                format!("attempt {} is not finalized", self.id),
            )),
        }
    }

    fn check_quiz(&self, quiz: &PersonalizedQuiz) -> Result<()> {
        if quiz.id != self.quiz_id {
            return Err(TutorError::validation(
                "quiz_id",
                format!("attempt {} belongs to quiz {}, not {}", self.id, self.quiz_id, quiz.id),
            ));
        }
        Ok(())
    }

    fn derive_feedback(&self, quiz: &PersonalizedQuiz) -> AttemptFeedback {
        let mut missed: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut topics: Vec<&str> = Vec::new();

        for question in &quiz.questions {
            if seen.insert(question.topic.as_str()) {
                topics.push(question.topic.as_str());
            }
            let correct = self
                .answers
                .iter()
                .any(|a| a.question_id == question.id && a.is_correct);
            if !correct && !missed.contains(&question.topic) {
                missed.push(question.topic.clone());
            }
        }

        let strengths = topics
            .into_iter()
            .filter(|t| !missed.iter().any(|m| m == t))
            .map(str::to_string)
            .collect();

        AttemptFeedback {
            strengths,
            message: feedback_message(self.percentage, &missed),
            improvements: missed,
        }
    }
}

fn feedback_message(percentage: f64, improvements: &[String]) -> String {
    let headline = if percentage >= 90.0 {
        "Excellent work!"
    } else if percentage >= 75.0 {
        "Great job!"
    } else if percentage >= 50.0 {
        "Good effort."
    } else {
        "Keep practicing."
    };
    if improvements.is_empty() {
        headline.to_string()
    } else {
        format!("{headline} Review: {}.", improvements.join(", "))
    }
}
