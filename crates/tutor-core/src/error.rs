//! Error taxonomy for the tutor contract layer.
//!
//! Every failure carries the entity id and the constraint that was violated,
//! so callers can decide whether to relax a request, surface the problem, or
//! retry against the storage collaborator.

use std::fmt;

use thiserror::Error;

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Student,
    Class,
    Question,
    Quiz,
    Attempt,
    Book,
    Recommendation,
    AffiliateLink,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Student => "student",
            EntityKind::Class => "class",
            EntityKind::Question => "question",
            EntityKind::Quiz => "quiz",
            EntityKind::Attempt => "attempt",
            EntityKind::Book => "book",
            EntityKind::Recommendation => "recommendation",
            EntityKind::AffiliateLink => "affiliate link",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`TutorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientCatalog,
    StateConflict,
    Expiry,
    Storage,
}

/// Errors surfaced by the generators, recorder, aggregator and tracker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TutorError {
    /// A request or record is malformed.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// The catalog cannot satisfy the selection constraints.
    #[error("insufficient catalog: requested {requested}, only {available} available ({constraint})")]
    InsufficientCatalog {
        requested: usize,
        available: usize,
        constraint: String,
    },

    /// The question was already answered in this attempt.
    #[error("duplicate answer for question {question_id} in attempt {attempt_id}")]
    DuplicateAnswer {
        attempt_id: String,
        question_id: String,
    },

    /// The attempt no longer accepts answers.
    #[error("attempt {attempt_id} is already finalized")]
    AlreadyFinalized { attempt_id: String },

    /// The affiliate link is inactive or past its expiry.
    #[error("affiliate link {tracking_id} is inactive")]
    LinkInactive { tracking_id: String },

    /// A status change would move an entity backwards or out of a terminal state.
    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: EntityKind,
        id: String,
        from: String,
        to: String,
    },

    /// A record with this id is already stored.
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: EntityKind, id: String },

    /// The quiz or recommendation has passed its expiry instant.
    #[error("{entity} {id} has expired")]
    Expired { entity: EntityKind, id: String },

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TutorError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        TutorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        TutorError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn expired(entity: EntityKind, id: impl fmt::Display) -> Self {
        TutorError::Expired {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: EntityKind,
        id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        TutorError::InvalidTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TutorError::Validation { .. } => ErrorKind::Validation,
            TutorError::NotFound { .. } => ErrorKind::NotFound,
            TutorError::InsufficientCatalog { .. } => ErrorKind::InsufficientCatalog,
            TutorError::DuplicateAnswer { .. }
            | TutorError::AlreadyFinalized { .. }
            | TutorError::LinkInactive { .. }
            | TutorError::InvalidTransition { .. }
            | TutorError::AlreadyExists { .. } => ErrorKind::StateConflict,
            TutorError::Expired { .. } => ErrorKind::Expiry,
            TutorError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns `true` if the caller may retry the same operation unchanged.
    ///
    /// Only storage failures qualify. Nothing in this crate retries internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TutorError::Storage(_))
    }
}

pub type Result<T, E = TutorError> = std::result::Result<T, E>;
