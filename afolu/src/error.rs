//! Error taxonomy shared by the collectors and the pipeline.
//!
//! Plumbing code uses `anyhow` with context; these enums exist where a caller
//! has to branch on the kind of failure (retry, degrade, or abort the run).

use thiserror::Error;

/// Failures reported by an imagery catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("reduction exceeds the pixel ceiling of {max_pixels}")]
    PixelLimitExceeded { max_pixels: u64 },

    #[error("not found in catalog: {what}")]
    NotFound { what: String },

    #[error("catalog temporarily unavailable ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("catalog rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected catalog response: {0}")]
    Decode(String),
}

impl CatalogError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::Transient { .. } => true,
            CatalogError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Failures reported by the AI narrative service.
#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("narrative service temporarily unavailable ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("narrative service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("no API key configured for the narrative service")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected narrative response: {0}")]
    Decode(String),
}

impl NarrativeError {
    /// Whether retrying the same prompt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NarrativeError::Transient { .. } => true,
            NarrativeError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Run-level failures. Every variant aborts the current run; results of
/// previously completed stages stay cached in the session.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("imagery unavailable: {0}")]
    ImageryUnavailable(String),

    #[error("no imagery matched the query for {start} to {end} (cloud cover < {cloud_cover}%)")]
    NoImagery {
        start: String,
        end: String,
        cloud_cover: u8,
    },

    #[error("{stage}: area too large for the pixel ceiling of {max_pixels}; draw a smaller area or raise the scale")]
    ResourceLimit { stage: &'static str, max_pixels: u64 },

    #[error("{stage} requires {missing} from an earlier stage")]
    MissingStage {
        stage: &'static str,
        missing: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = CatalogError::Transient {
            status: 429,
            message: "quota".to_string(),
        };
        assert!(err.is_transient());

        let err = CatalogError::PixelLimitExceeded { max_pixels: 10 };
        assert!(!err.is_transient());

        let err = NarrativeError::MissingApiKey;
        assert!(!err.is_transient());
    }

    #[test]
    fn test_resource_limit_message() {
        let err = PipelineError::ResourceLimit {
            stage: "carbon estimate",
            max_pixels: 1000,
        };
        let msg = err.to_string();
        assert!(msg.contains("carbon estimate"));
        assert!(msg.contains("1000"));
    }
}
