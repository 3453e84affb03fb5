use crate::types::UserId;
use thiserror::Error;

/// Failure reported by a persistence backend.
///
/// Backends keep their own error types; the core only needs to carry them to
/// the caller unchanged.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct BackendError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl BackendError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(err),
        }
    }

    /// Build a backend error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            source: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("no users enrolled")]
    EmptyEnrollment,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("cannot build a prototype from zero samples")]
    NoSamples,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error("no face detected in any captured frame")]
    NoFaceDetected,
    #[error("face detected but no embedding could be produced")]
    EmbeddingUnavailable,
    #[error("unknown user: {0}")]
    UnknownUser(UserId),
    #[error("invalid threshold {0}: must be finite and positive")]
    InvalidThreshold(f32),
    #[error("unknown metric {0:?}: expected \"cosine\" or \"euclidean\"")]
    UnknownMetric(String),
}

impl MatchError {
    /// True for outcomes that mean "try again, no face seen" rather than a
    /// system fault.
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, Self::NoFaceDetected | Self::EmbeddingUnavailable)
    }
}
