//! Tutor configuration loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use tutor_core::analytics::ClassAnalyticsConfig;
use tutor_core::books::RecommenderConfig;
use tutor_core::quiz::GeneratorConfig;
use tutor_core::ServiceConfig;

/// Longest quiz lifetime accepted, one hundred years.
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 100;
/// Longest recommendation horizon accepted, one hundred years.
pub const MAX_HORIZON_DAYS: i64 = 365 * 100;

/// Quiz generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSettings {
    /// Hours a generated quiz stays open.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    #[serde(default = "default_weak_area_weight")]
    pub weak_area_weight: f64,
    #[serde(default = "default_one")]
    pub target_difficulty_weight: f64,
    #[serde(default = "default_style_weight")]
    pub learning_style_weight: f64,
    #[serde(default = "default_interest_weight")]
    pub interest_weight: f64,
}

/// Book recommendation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSettings {
    #[serde(default = "default_topic_weight")]
    pub topic_weight: f64,
    #[serde(default = "default_rating_weight")]
    pub rating_weight: f64,
    #[serde(default = "default_price_weight")]
    pub price_weight: f64,
    #[serde(default = "default_book_bonus")]
    pub learning_style_weight: f64,
    #[serde(default = "default_book_bonus")]
    pub interest_weight: f64,
    #[serde(default = "default_max_recommendations")]
    pub max_recommendations: usize,
    /// Days a recommendation stays active.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
    #[serde(default = "default_high_threshold")]
    pub high_priority_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_priority_threshold: f64,
}

/// Class analytics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSettings {
    #[serde(default = "default_struggling_threshold")]
    pub struggling_threshold: f64,
    #[serde(default = "default_top_performers")]
    pub top_performers: usize,
}

/// Top-level tutor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    /// Max concurrent per-student folds in class analytics.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Directory of TOML question and book catalogs.
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,
    #[serde(default)]
    pub quiz: QuizSettings,
    #[serde(default)]
    pub recommendations: RecommendationSettings,
    #[serde(default)]
    pub class: ClassSettings,
}

fn default_parallelism() -> usize {
    4
}
fn default_ttl_hours() -> i64 {
    72
}
fn default_weak_area_weight() -> f64 {
    2.0
}
fn default_one() -> f64 {
    1.0
}
fn default_style_weight() -> f64 {
    0.5
}
fn default_interest_weight() -> f64 {
    0.25
}
fn default_topic_weight() -> f64 {
    0.5
}
fn default_rating_weight() -> f64 {
    0.3
}
fn default_price_weight() -> f64 {
    0.2
}
fn default_book_bonus() -> f64 {
    0.05
}
fn default_max_recommendations() -> usize {
    3
}
fn default_horizon_days() -> i64 {
    30
}
fn default_high_threshold() -> f64 {
    0.75
}
fn default_medium_threshold() -> f64 {
    0.4
}
fn default_struggling_threshold() -> f64 {
    60.0
}
fn default_top_performers() -> usize {
    3
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            weak_area_weight: default_weak_area_weight(),
            target_difficulty_weight: default_one(),
            learning_style_weight: default_style_weight(),
            interest_weight: default_interest_weight(),
        }
    }
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            topic_weight: default_topic_weight(),
            rating_weight: default_rating_weight(),
            price_weight: default_price_weight(),
            learning_style_weight: default_book_bonus(),
            interest_weight: default_book_bonus(),
            max_recommendations: default_max_recommendations(),
            horizon_days: default_horizon_days(),
            high_priority_threshold: default_high_threshold(),
            medium_priority_threshold: default_medium_threshold(),
        }
    }
}

impl Default for ClassSettings {
    fn default() -> Self {
        Self {
            struggling_threshold: default_struggling_threshold(),
            top_performers: default_top_performers(),
        }
    }
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            catalog_dir: None,
            quiz: QuizSettings::default(),
            recommendations: RecommendationSettings::default(),
            class: ClassSettings::default(),
        }
    }
}

impl TutorConfig {
    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            quiz_ttl: Duration::hours(self.quiz.ttl_hours.clamp(1, MAX_TTL_HOURS)),
            weak_area_weight: self.quiz.weak_area_weight,
            target_difficulty_weight: self.quiz.target_difficulty_weight,
            learning_style_weight: self.quiz.learning_style_weight,
            interest_weight: self.quiz.interest_weight,
        }
    }

    pub fn recommender(&self) -> RecommenderConfig {
        let r = &self.recommendations;
        RecommenderConfig {
            topic_weight: r.topic_weight,
            rating_weight: r.rating_weight,
            price_weight: r.price_weight,
            learning_style_weight: r.learning_style_weight,
            interest_weight: r.interest_weight,
            default_max_recommendations: r.max_recommendations,
            horizon: Duration::days(r.horizon_days.clamp(1, MAX_HORIZON_DAYS)),
            high_priority_threshold: r.high_priority_threshold,
            medium_priority_threshold: r.medium_priority_threshold,
        }
    }

    pub fn class_analytics(&self) -> ClassAnalyticsConfig {
        ClassAnalyticsConfig {
            struggling_threshold: self.class.struggling_threshold,
            top_performers: self.class.top_performers,
        }
    }

    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            generator: self.generator(),
            recommender: self.recommender(),
            class_analytics: self.class_analytics(),
            parallelism: self.parallelism,
        }
    }

    /// Reject settings the generators cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.quiz.ttl_hours) {
            anyhow::bail!(
                "quiz.ttl_hours must be in [1, {MAX_TTL_HOURS}], got {}",
                self.quiz.ttl_hours
            );
        }
        if !(1..=MAX_HORIZON_DAYS).contains(&self.recommendations.horizon_days) {
            anyhow::bail!(
                "recommendations.horizon_days must be in [1, {MAX_HORIZON_DAYS}], got {}",
                self.recommendations.horizon_days
            );
        }
        if self.recommendations.max_recommendations == 0 {
            anyhow::bail!("recommendations.max_recommendations must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.class.struggling_threshold) {
            anyhow::bail!(
                "class.struggling_threshold must be in [0, 100], got {}",
                self.class.struggling_threshold
            );
        }
        Ok(())
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `tutor.toml` in the current directory
/// 2. `~/.config/ai-tutor/config.toml`
///
/// Environment variable overrides: `TUTOR_PARALLELISM`,
/// `TUTOR_RECOMMENDATION_HORIZON_DAYS`, `TUTOR_QUIZ_TTL_HOURS`.
pub fn load_config() -> Result<TutorConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<TutorConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("tutor.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<TutorConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => TutorConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply `TUTOR_*` overrides read through `lookup`.
///
/// Values that fail to parse are logged and ignored.
pub fn apply_env_overrides(config: &mut TutorConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = parse_override::<usize>(&lookup, "TUTOR_PARALLELISM") {
        config.parallelism = v;
    }
    if let Some(v) = parse_override::<i64>(&lookup, "TUTOR_RECOMMENDATION_HORIZON_DAYS") {
        config.recommendations.horizon_days = v;
    }
    if let Some(v) = parse_override::<i64>(&lookup, "TUTOR_QUIZ_TTL_HOURS") {
        config.quiz.ttl_hours = v;
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("ai-tutor"))
}
