//! TOML catalog loader.
//!
//! Loads question and book catalogs from TOML files and directories, and
//! reports soft issues that content authors should fix.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::books::{AffiliateLink, Book, Commission};
use crate::model::{Difficulty, Explanation, LearningStyle, Platform, QuizQuestion};

/// A loaded catalog of questions and books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub books: Vec<Book>,
}

impl Catalog {
    /// Concatenate several catalogs, keeping the first catalog's identity.
    pub fn merge(catalogs: Vec<Catalog>) -> Option<Catalog> {
        let mut iter = catalogs.into_iter();
        let mut merged = iter.next()?;
        for c in iter {
            merged.questions.extend(c.questions);
            merged.books.extend(c.books);
        }
        Some(merged)
    }
}

#[derive(Debug, Deserialize)]
struct TomlCatalogFile {
    catalog: TomlCatalogHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
    #[serde(default)]
    books: Vec<TomlBook>,
}

#[derive(Debug, Deserialize)]
struct TomlCatalogHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    question: String,
    options: Vec<String>,
    correct_answer: usize,
    subject: String,
    topic: String,
    #[serde(default = "default_difficulty_str")]
    difficulty: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    learning_styles: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_points")]
    points: u32,
}

fn default_difficulty_str() -> String {
    "medium".to_string()
}

fn default_points() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TomlBook {
    id: String,
    title: String,
    author: String,
    #[serde(default)]
    isbn: Option<String>,
    subject: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default = "default_difficulty_str")]
    difficulty: String,
    #[serde(default = "default_language")]
    language: String,
    price: f64,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    review_count: u32,
    #[serde(default)]
    learning_styles: Vec<String>,
    #[serde(default)]
    links: Vec<TomlLink>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlLink {
    id: String,
    platform: String,
    url: String,
    tracking_id: String,
    #[serde(default)]
    commission_percentage: f64,
    #[serde(default)]
    fixed_commission: Option<f64>,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

fn parse_styles(styles: Vec<String>) -> Result<Vec<LearningStyle>> {
    styles
        .iter()
        .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!("{}", e)))
        .collect()
}

/// Parse a single TOML file into a [`Catalog`].
pub fn parse_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file: {}", path.display()))?;

    parse_catalog_str(&content, path)
}

/// Parse a TOML string into a [`Catalog`] (useful for testing).
///
/// Entries that break a catalog invariant (answer index out of range,
/// commission outside `[0, 100]`, duplicate active links) are errors.
pub fn parse_catalog_str(content: &str, source_path: &Path) -> Result<Catalog> {
    let parsed: TomlCatalogFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let difficulty: Difficulty = q
                .difficulty
                .parse()
                .map_err(|e: String| anyhow::anyhow!("question {}: {}", q.id, e))?;
            let question = QuizQuestion {
                id: q.id,
                question: q.question,
                options: q.options,
                correct_answer: q.correct_answer,
                subject: q.subject,
                topic: q.topic,
                difficulty,
                explanation: Explanation {
                    text: q.explanation,
                    references: q.references,
                },
                learning_styles: parse_styles(q.learning_styles)?,
                tags: q.tags,
                points: q.points,
            };
            question.validate()?;
            Ok(question)
        })
        .collect::<Result<Vec<_>>>()?;

    let books = parsed
        .books
        .into_iter()
        .map(|b| {
            let difficulty: Difficulty = b
                .difficulty
                .parse()
                .map_err(|e: String| anyhow::anyhow!("book {}: {}", b.id, e))?;
            let affiliate_links = b
                .links
                .into_iter()
                .map(|l| {
                    let platform: Platform = l
                        .platform
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!("link {}: {}", l.id, e))?;
                    Ok(AffiliateLink {
                        id: l.id,
                        book_id: b.id.clone(),
                        platform,
                        url: l.url,
                        tracking_id: l.tracking_id,
                        commission: Commission {
                            percentage: l.commission_percentage,
                            fixed_amount: l.fixed_commission,
                        },
                        is_active: l.is_active,
                        expires_at: None,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let book = Book {
                id: b.id,
                title: b.title,
                author: b.author,
                isbn: b.isbn,
                subject: b.subject,
                topics: b.topics,
                difficulty,
                language: b.language,
                price: b.price,
                currency: b.currency,
                rating: b.rating,
                review_count: b.review_count,
                learning_styles: parse_styles(b.learning_styles)?,
                affiliate_links,
            };
            book.validate()?;
            Ok(book)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Catalog {
        id: parsed.catalog.id,
        name: parsed.catalog.name,
        description: parsed.catalog.description,
        questions,
        books,
    })
}

/// Recursively load all `.toml` catalog files from a directory.
pub fn load_catalog_directory(dir: &Path) -> Result<Vec<Catalog>> {
    let mut catalogs = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();

        if path.is_dir() {
            catalogs.extend(load_catalog_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_catalog(&path) {
                Ok(catalog) => catalogs.push(catalog),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(catalogs)
}

/// A soft issue found in a catalog.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question or book id (if applicable).
    pub entry_id: Option<String>,
    pub message: String,
}

/// Check a catalog for issues that do not break an invariant.
pub fn validate_catalog(catalog: &Catalog) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for q in &catalog.questions {
        if !seen.insert(&q.id) {
            warnings.push(ValidationWarning {
                entry_id: Some(q.id.clone()),
                message: format!("duplicate question ID: {}", q.id),
            });
        }
    }

    let mut seen = HashSet::new();
    for b in &catalog.books {
        if !seen.insert(&b.id) {
            warnings.push(ValidationWarning {
                entry_id: Some(b.id.clone()),
                message: format!("duplicate book ID: {}", b.id),
            });
        }
    }

    for q in &catalog.questions {
        if q.question.trim().is_empty() {
            warnings.push(ValidationWarning {
                entry_id: Some(q.id.clone()),
                message: "question text is empty".into(),
            });
        }
        if q.explanation.text.trim().is_empty() {
            warnings.push(ValidationWarning {
                entry_id: Some(q.id.clone()),
                message: "question has no explanation".into(),
            });
        }
        if q.topic.trim().is_empty() {
            warnings.push(ValidationWarning {
                entry_id: Some(q.id.clone()),
                message: "question has no topic".into(),
            });
        }
    }

    for b in &catalog.books {
        if !b.affiliate_links.iter().any(|l| l.is_active) {
            warnings.push(ValidationWarning {
                entry_id: Some(b.id.clone()),
                message: "book has no active affiliate link".into(),
            });
        }
        if b.topics.is_empty() {
            warnings.push(ValidationWarning {
                entry_id: Some(b.id.clone()),
                message: "book has no topics and can only match topic-less requests".into(),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[catalog]
id = "grade5-math"
name = "Grade 5 Math"
description = "Fractions and geometry"

[[questions]]
id = "frac-1"
question = "What is 1/2 + 1/4?"
options = ["3/4", "2/6", "1/6", "1"]
correct_answer = 0
subject = "math"
topic = "fractions"
difficulty = "easy"
explanation = "Convert 1/2 to 2/4, then add."
learning_styles = ["visual"]

[[questions]]
id = "geo-1"
question = "How many sides does a hexagon have?"
options = ["5", "6", "7", "8"]
correct_answer = 1
subject = "math"
topic = "geometry"
explanation = "Hex means six."

[[books]]
id = "book-fractions"
title = "Fractions Made Fun"
author = "J. Smith"
subject = "math"
topics = ["fractions"]
difficulty = "easy"
price = 12.99
rating = 4.6

[[books.links]]
id = "amz-1"
platform = "amazon"
url = "https://amazon.example/fractions"
tracking_id = "trk-amz-1"
commission_percentage = 4.5
"#;

    #[test]
    fn parse_valid_toml() {
        let catalog = parse_catalog_str(VALID_TOML, &PathBuf::from("test.toml")).unwrap();
        assert_eq!(catalog.id, "grade5-math");
        assert_eq!(catalog.questions.len(), 2);
        assert_eq!(catalog.questions[0].learning_styles, vec![LearningStyle::Visual]);
        assert_eq!(catalog.questions[1].difficulty, Difficulty::Medium);
        assert_eq!(catalog.books.len(), 1);
        let link = &catalog.books[0].affiliate_links[0];
        assert_eq!(link.book_id, "book-fractions");
        assert_eq!(link.platform, Platform::Amazon);
        assert!(link.is_active);
        assert!(validate_catalog(&catalog).is_empty());
    }

    #[test]
    fn out_of_range_answer_is_an_error() {
        let toml = r#"
[catalog]
id = "bad"
name = "Bad"

[[questions]]
id = "q1"
question = "Pick one"
options = ["a", "b"]
correct_answer = 2
subject = "math"
topic = "misc"
"#;
        let err = parse_catalog_str(toml, &PathBuf::from("bad.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn commission_out_of_range_is_an_error() {
        let toml = r#"
[catalog]
id = "bad"
name = "Bad"

[[books]]
id = "b1"
title = "T"
author = "A"
subject = "math"
price = 5.0

[[books.links]]
id = "l1"
platform = "apple"
url = "https://apple.example/b1"
tracking_id = "trk-1"
commission_percentage = 150.0
"#;
        assert!(parse_catalog_str(toml, &PathBuf::from("bad.toml")).is_err());
    }

    #[test]
    fn warns_about_duplicates_and_gaps() {
        let toml = r#"
[catalog]
id = "gaps"
name = "Gaps"

[[questions]]
id = "same"
question = "One?"
options = ["a", "b"]
correct_answer = 0
subject = "math"
topic = "t"

[[questions]]
id = "same"
question = "Two?"
options = ["a", "b"]
correct_answer = 1
subject = "math"
topic = "t"
explanation = "b"

[[books]]
id = "b1"
title = "T"
author = "A"
subject = "math"
price = 5.0
"#;
        let catalog = parse_catalog_str(toml, &PathBuf::from("gaps.toml")).unwrap();
        let warnings = validate_catalog(&catalog);
        assert!(warnings.iter().any(|w| w.message.contains("duplicate question")));
        assert!(warnings.iter().any(|w| w.message.contains("no explanation")));
        assert!(warnings.iter().any(|w| w.message.contains("no active affiliate link")));
        assert!(warnings.iter().any(|w| w.message.contains("no topics")));
    }

    #[test]
    fn parse_malformed_toml() {
        let result = parse_catalog_str("this is not [valid toml }{", &PathBuf::from("bad.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_difficulty_is_an_error() {
        let toml = VALID_TOML.replace("difficulty = \"easy\"\nexplanation", "difficulty = \"brutal\"\nexplanation");
        assert!(parse_catalog_str(&toml, &PathBuf::from("x.toml")).is_err());
    }

    #[test]
    fn load_directory_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not toml {").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("more.toml"),
            VALID_TOML.replace("grade5-math", "nested-math"),
        )
        .unwrap();

        let catalogs = load_catalog_directory(dir.path()).unwrap();
        assert_eq!(catalogs.len(), 2);
        let merged = Catalog::merge(catalogs).unwrap();
        assert_eq!(merged.questions.len(), 4);
    }

    #[test]
    fn load_directory_requires_a_directory() {
        assert!(load_catalog_directory(Path::new("/definitely/not/here")).is_err());
    }
}
