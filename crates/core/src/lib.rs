//! Core library: listing, batch classification, naming, placement, indexing.

pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod naming;
pub mod organizer;
pub mod pipeline;
pub mod scanner;

pub use error::{FileFailure, OrganizeError};
pub use models::{Analysis, BatchOutcome, PlacedFile, RunResult};
pub use organizer::{build_registry, Organizer};
