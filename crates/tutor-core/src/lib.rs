//! tutor-core — Quiz generation, attempt scoring, analytics, and book
//! recommendation contracts for the AI classroom tutor.
//!
//! Every generator and aggregator is a pure function over snapshots.
//! [`service::TutorService`] wires them to a [`traits::TutorStore`].

pub mod affiliate;
pub mod analytics;
pub mod attempt;
pub mod books;
pub mod catalog;
pub mod error;
pub mod model;
pub mod quiz;
pub mod service;
pub mod traits;

pub use error::{EntityKind, ErrorKind, Result, TutorError};
pub use service::{RecommendationAction, ServiceConfig, SubmitOutcome, TutorService};
pub use traits::TutorStore;
