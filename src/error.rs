//! Error types for the pitch-editing engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::segment::SegmentId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A single segment that could not be resynthesized.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentFailure {
    pub segment: SegmentId,
    pub reason: String,
}

/// Error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Empty, too short, or non-finite input at extraction.
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// Incompatible frame rate or model configuration across operations.
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Edit outside the track bounds.
    #[error("Frame range {start}..{end} is outside track bounds 0..{len}")]
    OutOfRange { start: usize, end: usize, len: usize },

    /// Synthesis requested before a vocoder was bound.
    #[error("No vocoder model is loaded")]
    ModelNotLoaded,

    /// Binding a model from disk failed.
    #[error("Failed to load model from {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// Mel and F0 lengths disagree.
    #[error("Shape mismatch: expected {expected} frames, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Numerical failure inside one inference call.
    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Some segments failed while the rest of the track was rendered.
    #[error(
        "Synthesis failed for {} segment(s): {}",
        .failed.len(),
        describe_failures(.failed)
    )]
    PartialSynthesisFailure { failed: Vec<SegmentFailure> },

    /// The thread owning a track is gone.
    #[error("Track worker for '{0}' has stopped")]
    WorkerStopped(String),

    /// Malformed configuration file.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_failures(failed: &[SegmentFailure]) -> String {
    failed
        .iter()
        .map(|f| format!("#{} ({})", f.segment.0, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_names_segments() {
        let err = EngineError::PartialSynthesisFailure {
            failed: vec![
                SegmentFailure {
                    segment: SegmentId(1),
                    reason: "NaN in output".into(),
                },
                SegmentFailure {
                    segment: SegmentId(4),
                    reason: "boom".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 segment(s)"));
        assert!(msg.contains("#1 (NaN in output)"));
        assert!(msg.contains("#4 (boom)"));
    }

    #[test]
    fn out_of_range_message() {
        let err = EngineError::OutOfRange {
            start: 10,
            end: 120,
            len: 100,
        };
        assert_eq!(
            err.to_string(),
            "Frame range 10..120 is outside track bounds 0..100"
        );
    }
}
