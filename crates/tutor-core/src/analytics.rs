//! Analytics aggregator: folds finalized attempts into student and class summaries.
//!
//! Every function here is a pure fold. Maps are `BTreeMap` so the same input
//! sequence always serializes to the same output.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::attempt::QuizAttempt;
use crate::model::{ClassProfile, StudentProfile};

/// Subject key used for attempts on mixed-subject quizzes.
pub const MIXED_SUBJECT: &str = "mixed";

/// Per-subject rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectBreakdown {
    pub attempts: u32,
    pub questions_answered: u32,
    pub time_spent_secs: u64,
    pub average_score: f64,
}

/// Topic tally across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicPerformance {
    pub topic: String,
    pub correct: u32,
    pub incorrect: u32,
}

impl TopicPerformance {
    pub fn accuracy(&self) -> f64 {
        let total = self.correct + self.incorrect;
        if total == 0 {
            0.0
        } else {
            self.correct as f64 / total as f64
        }
    }
}

/// Summary of one student's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnalytics {
    pub student_id: String,
    pub total_attempts: u32,
    /// Arithmetic mean of attempt percentages.
    pub average_score: f64,
    pub best_score: f64,
    /// Percentage-point change between the earliest and most recent thirds.
    pub improvement_rate: f64,
    pub total_time_spent_secs: u64,
    pub subject_breakdown: BTreeMap<String, SubjectBreakdown>,
    /// Topics with any incorrect answer, most misses first.
    pub weak_topics: Vec<String>,
    /// Topics answered without a miss, most answers first.
    pub strong_topics: Vec<String>,
}

impl QuizAnalytics {
    /// Write the rolling average and attempt count back into the profile.
    pub fn apply_to_profile(&self, profile: &mut StudentProfile) {
        if profile.id != self.student_id {
            tracing::warn!(
                profile = %profile.id,
                analytics = %self.student_id,
                "refusing to apply analytics to a different student"
            );
            return;
        }
        profile.average_score = self.average_score.clamp(0.0, 100.0);
        profile.total_quizzes_completed = self.total_attempts;
    }
}

/// Fold a student's attempts, in chronological order, into [`QuizAnalytics`].
///
/// Attempts that are not finalized or belong to another student are skipped.
pub fn compute_quiz_analytics(student_id: &str, attempts: &[QuizAttempt]) -> QuizAnalytics {
    let finished: Vec<&QuizAttempt> = attempts
        .iter()
        .filter(|a| a.completed && a.student_id == student_id)
        .collect();

    let percentages: Vec<f64> = finished.iter().map(|a| a.percentage).collect();
    let average_score = mean(&percentages);
    let best_score = percentages.iter().copied().fold(0.0, f64::max);

    let mut grouped: BTreeMap<String, Vec<&QuizAttempt>> = BTreeMap::new();
    for a in &finished {
        let subject = a
            .subject
            .clone()
            .unwrap_or_else(|| MIXED_SUBJECT.to_string())
            .to_lowercase();
        grouped.entry(subject).or_default().push(*a);
    }
    let subject_breakdown = grouped
        .into_iter()
        .map(|(subject, group)| {
            let scores: Vec<f64> = group.iter().map(|a| a.percentage).collect();
            let breakdown = SubjectBreakdown {
                attempts: group.len() as u32,
                questions_answered: group.iter().map(|a| a.answers.len() as u32).sum(),
                time_spent_secs: group.iter().map(|a| a.time_spent_secs).sum(),
                average_score: mean(&scores),
            };
            (subject, breakdown)
        })
        .collect();

    let topics = topic_performance(&finished);
    let mut weak: Vec<&TopicPerformance> = topics.iter().filter(|t| t.incorrect > 0).collect();
    weak.sort_by(|a, b| b.incorrect.cmp(&a.incorrect).then_with(|| a.topic.cmp(&b.topic)));
    let mut strong: Vec<&TopicPerformance> = topics.iter().filter(|t| t.incorrect == 0).collect();
    strong.sort_by(|a, b| b.correct.cmp(&a.correct).then_with(|| a.topic.cmp(&b.topic)));

    QuizAnalytics {
        student_id: student_id.to_string(),
        total_attempts: finished.len() as u32,
        average_score,
        best_score,
        improvement_rate: improvement_rate(&percentages),
        total_time_spent_secs: finished.iter().map(|a| a.time_spent_secs).sum(),
        subject_breakdown,
        weak_topics: weak.into_iter().map(|t| t.topic.clone()).collect(),
        strong_topics: strong.into_iter().map(|t| t.topic.clone()).collect(),
    }
}

/// Mean of the most recent third minus mean of the earliest third.
///
/// Zero for fewer than three attempts.
pub fn improvement_rate(percentages: &[f64]) -> f64 {
    let third = percentages.len() / 3;
    if third == 0 {
        return 0.0;
    }
    let earliest = mean(&percentages[..third]);
    let recent = mean(&percentages[percentages.len() - third..]);
    recent - earliest
}

/// Per-topic correct/incorrect counts, sorted by topic name.
pub fn topic_performance(attempts: &[&QuizAttempt]) -> Vec<TopicPerformance> {
    let mut tally: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for a in attempts {
        for answer in &a.answers {
            let entry = tally.entry(answer.topic.to_lowercase()).or_default();
            if answer.is_correct {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }
    tally
        .into_iter()
        .map(|(topic, (correct, incorrect))| TopicPerformance {
            topic,
            correct,
            incorrect,
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Thresholds for class-level summaries.
#[derive(Debug, Clone)]
pub struct ClassAnalyticsConfig {
    /// Students averaging below this percentage are flagged as struggling.
    pub struggling_threshold: f64,
    /// How many top performers to list.
    pub top_performers: usize,
}

impl Default for ClassAnalyticsConfig {
    fn default() -> Self {
        Self {
            struggling_threshold: 60.0,
            top_performers: 3,
        }
    }
}

/// A topic and how many students in the class are weak in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub students: u32,
}

/// Summary of a class roster's attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassQuizAnalytics {
    pub class_id: String,
    pub student_count: u32,
    /// Students on the roster with at least one finalized attempt.
    pub active_students: u32,
    pub participation_rate: f64,
    /// Mean of per-student averages across active students.
    pub average_score: f64,
    pub top_performers: Vec<String>,
    pub struggling_students: Vec<String>,
    pub common_weak_areas: Vec<TopicCount>,
    pub subject_breakdown: BTreeMap<String, SubjectBreakdown>,
}

/// Combine per-student analytics for the students on `class`'s roster.
pub fn compute_class_analytics(
    class: &ClassProfile,
    per_student: &[QuizAnalytics],
    config: &ClassAnalyticsConfig,
) -> ClassQuizAnalytics {
    let by_id: HashMap<&str, &QuizAnalytics> = per_student
        .iter()
        .map(|a| (a.student_id.as_str(), a))
        .collect();

    // Roster order keeps ties deterministic.
    let active: Vec<&QuizAnalytics> = class
        .student_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .filter(|a| a.total_attempts > 0)
        .collect();

    let averages: Vec<f64> = active.iter().map(|a| a.average_score).collect();

    let mut ranked = active.clone();
    ranked.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));
    let top_performers = ranked
        .iter()
        .take(config.top_performers)
        .map(|a| a.student_id.clone())
        .collect();

    let struggling_students = active
        .iter()
        .filter(|a| a.average_score < config.struggling_threshold)
        .map(|a| a.student_id.clone())
        .collect();

    let mut weak_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for a in &active {
        for topic in &a.weak_topics {
            *weak_counts.entry(topic.as_str()).or_default() += 1;
        }
    }
    let mut common_weak_areas: Vec<TopicCount> = weak_counts
        .into_iter()
        .map(|(topic, students)| TopicCount {
            topic: topic.to_string(),
            students,
        })
        .collect();
    common_weak_areas.sort_by(|a, b| b.students.cmp(&a.students));

    let mut subject_breakdown: BTreeMap<String, SubjectBreakdown> = BTreeMap::new();
    let mut score_weights: BTreeMap<String, f64> = BTreeMap::new();
    for a in &active {
        for (subject, b) in &a.subject_breakdown {
            let merged = subject_breakdown.entry(subject.clone()).or_default();
            merged.attempts += b.attempts;
            merged.questions_answered += b.questions_answered;
            merged.time_spent_secs += b.time_spent_secs;
            *score_weights.entry(subject.clone()).or_default() +=
                b.average_score * b.attempts as f64;
        }
    }
    for (subject, merged) in subject_breakdown.iter_mut() {
        if merged.attempts > 0 {
            merged.average_score = score_weights[subject] / merged.attempts as f64;
        }
    }

    let student_count = class.student_ids.len() as u32;
    ClassQuizAnalytics {
        class_id: class.id.clone(),
        student_count,
        active_students: active.len() as u32,
        participation_rate: if student_count == 0 {
            0.0
        } else {
            active.len() as f64 / student_count as f64
        },
        average_score: mean(&averages),
        top_performers,
        struggling_students,
        common_weak_areas,
        subject_breakdown,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attempt::AttemptAnswer;
    use crate::quiz::tests::now;
    use uuid::Uuid;

    pub(crate) fn attempt(student: &str, subject: &str, percentage: f64, topics: &[(&str, bool)]) -> QuizAttempt {
        let answers: Vec<AttemptAnswer> = topics
            .iter()
            .enumerate()
            .map(|(i, (topic, ok))| AttemptAnswer {
                question_id: format!("q{i}"),
                topic: topic.to_string(),
                selected_answer: 0,
                is_correct: *ok,
                time_spent_secs: 30,
            })
            .collect();
        QuizAttempt {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            student_id: student.into(),
            subject: Some(subject.into()),
            total_questions: answers.len() as u32,
            score: answers.iter().filter(|a| a.is_correct).count() as u32,
            percentage,
            time_spent_secs: 30 * answers.len() as u64,
            answers,
            start_time: now(),
            end_time: Some(now()),
            completed: true,
            feedback: None,
        }
    }

    #[test]
    fn average_is_the_arithmetic_mean() {
        let attempts = vec![
            attempt("s1", "math", 80.0, &[("a", true)]),
            attempt("s1", "math", 90.0, &[("a", true)]),
            attempt("s1", "math", 70.0, &[("a", false)]),
        ];
        let analytics = compute_quiz_analytics("s1", &attempts);
        assert!((analytics.average_score - 80.0).abs() < f64::EPSILON);
        assert_eq!(analytics.total_attempts, 3);
        assert!((analytics.best_score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn improvement_rate_compares_thirds() {
        assert_eq!(improvement_rate(&[50.0, 90.0]), 0.0);
        assert!((improvement_rate(&[50.0, 60.0, 80.0]) - 30.0).abs() < 1e-9);
        // Six attempts: first two average 45, last two average 85.
        let rate = improvement_rate(&[40.0, 50.0, 10.0, 100.0, 80.0, 90.0]);
        assert!((rate - 40.0).abs() < 1e-9);
    }

    #[test]
    fn subject_breakdown_groups_and_sums() {
        let attempts = vec![
            attempt("s1", "Math", 50.0, &[("fractions", true), ("fractions", false)]),
            attempt("s1", "math", 100.0, &[("algebra", true)]),
            attempt("s1", "science", 0.0, &[("cells", false)]),
        ];
        let analytics = compute_quiz_analytics("s1", &attempts);
        let math = &analytics.subject_breakdown["math"];
        assert_eq!(math.attempts, 2);
        assert_eq!(math.questions_answered, 3);
        assert_eq!(math.time_spent_secs, 90);
        assert!((math.average_score - 75.0).abs() < f64::EPSILON);
        assert_eq!(analytics.subject_breakdown["science"].attempts, 1);
        assert_eq!(analytics.weak_topics, vec!["cells", "fractions"]);
        assert_eq!(analytics.strong_topics, vec!["algebra"]);
    }

    #[test]
    fn unfinished_and_foreign_attempts_are_ignored() {
        let mut open = attempt("s1", "math", 100.0, &[("a", true)]);
        open.completed = false;
        let attempts = vec![open, attempt("s2", "math", 40.0, &[("a", true)])];
        let analytics = compute_quiz_analytics("s1", &attempts);
        assert_eq!(analytics.total_attempts, 0);
        assert_eq!(analytics.average_score, 0.0);
        assert!(analytics.subject_breakdown.is_empty());
    }

    #[test]
    fn analytics_are_deterministic() {
        let attempts = vec![
            attempt("s1", "math", 60.0, &[("b", false), ("a", true)]),
            attempt("s1", "history", 90.0, &[("c", true)]),
            attempt("s1", "math", 75.0, &[("a", false)]),
        ];
        let first = compute_quiz_analytics("s1", &attempts);
        let second = compute_quiz_analytics("s1", &attempts);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn apply_to_profile_overwrites_rolling_stats() {
        let attempts = vec![
            attempt("stu-1", "math", 40.0, &[("a", true)]),
            attempt("stu-1", "math", 60.0, &[("a", true)]),
        ];
        let analytics = compute_quiz_analytics("stu-1", &attempts);
        let mut profile = crate::quiz::tests::profile();
        analytics.apply_to_profile(&mut profile);
        assert!((profile.average_score - 50.0).abs() < f64::EPSILON);
        assert_eq!(profile.total_quizzes_completed, 2);
    }

    #[test]
    fn class_summary() {
        let class = ClassProfile {
            id: "c1".into(),
            name: "Grade 5".into(),
            teacher: "Ms. Lee".into(),
            grade: Some(5),
            subject: Some("math".into()),
            student_ids: vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
        };
        let per_student = vec![
            compute_quiz_analytics(
                "s1",
                &[attempt("s1", "math", 90.0, &[("fractions", true)])],
            ),
            compute_quiz_analytics(
                "s2",
                &[attempt("s2", "math", 50.0, &[("fractions", false), ("algebra", false)])],
            ),
            compute_quiz_analytics(
                "s3",
                &[attempt("s3", "math", 70.0, &[("fractions", false)])],
            ),
            compute_quiz_analytics("s4", &[]),
        ];
        let summary = compute_class_analytics(&class, &per_student, &ClassAnalyticsConfig::default());
        assert_eq!(summary.student_count, 4);
        assert_eq!(summary.active_students, 3);
        assert!((summary.participation_rate - 0.75).abs() < f64::EPSILON);
        assert!((summary.average_score - 70.0).abs() < 1e-9);
        assert_eq!(summary.top_performers, vec!["s1", "s3", "s2"]);
        assert_eq!(summary.struggling_students, vec!["s2"]);
        assert_eq!(summary.common_weak_areas[0].topic, "fractions");
        assert_eq!(summary.common_weak_areas[0].students, 2);
        let math = &summary.subject_breakdown["math"];
        assert_eq!(math.attempts, 3);
        assert!((math.average_score - 70.0).abs() < 1e-9);
    }
}
