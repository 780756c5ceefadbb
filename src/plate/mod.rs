//! Plate Text Pipeline
//!
//! Normalization, format correction, and cross-image aggregation of
//! recognized plate text.

pub mod aggregate;
pub mod format;
pub mod normalize;

pub use aggregate::CandidateAggregator;
pub use format::format_plate;
pub use normalize::{normalize_fragments, NormalizedText};

use thiserror::Error;

/// Why one image was dropped from the run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("no plate detected above threshold")]
    NoDetection,
    #[error("recognizer produced no text")]
    NoRecognition,
    #[error("text did not match an accepted plate shape: {0}")]
    FormatRejected(String),
}

/// Outcome of processing one image source.
///
/// Skips are ordinary data, not raised failures; the orchestrator folds a
/// sequence of outcomes into the aggregator and the run never aborts.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    /// A validated candidate and its single-frame confidence
    Accepted { candidate: String, confidence: f32 },
    /// The image was dropped; the run continues
    Skipped(SkipReason),
}
