//! tutor-store — Record storage and configuration for the AI classroom tutor.
//!
//! Provides [`MemoryStore`], an in-process implementation of
//! [`tutor_core::TutorStore`], and the TOML/env configuration layer.

pub mod config;
pub mod memory;

pub use config::{load_config, load_config_from, TutorConfig};
pub use memory::{MemoryStore, Snapshot};
