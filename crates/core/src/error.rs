use providers::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("authentication with {provider} failed")]
    Authentication {
        provider: String,
        #[source]
        source: Option<ProviderError>,
    },
    #[error("listing {folder} failed")]
    Listing {
        folder: String,
        #[source]
        source: ProviderError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot prepare scratch directory")]
    Scratch(#[source] std::io::Error),
}

/// Why one file was not organized. Recorded per file; never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileFailure {
    #[error("invalid file record: {0}")]
    InvalidRecord(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("image could not be classified")]
    Classification,
    #[error("batch classification failed: {0}")]
    BatchClassification(String),
    #[error("placement failed: {0}")]
    Placement(String),
    #[error("{phase} timed out after {}s", after.as_secs())]
    Timeout { phase: &'static str, after: Duration },
}
