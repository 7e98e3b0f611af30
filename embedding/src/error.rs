use thiserror::Error;

/// Errors returned by embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding: expected {expected} values, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding: expected {expected} bytes, got {got}")]
    ByteLengthMismatch { expected: usize, got: usize },
}
