use thiserror::Error;

/// Failures of the TMX cleaning core.
///
/// Per-unit structural problems never show up here: a malformed unit is dropped and logged in
/// the report, and a zero-length embedding scores 0.0.
#[derive(Error, Debug)]
pub enum CleanError {
    /// The input cannot be enumerated into translation units. No partial output exists.
    #[error("document parse error: {0}")]
    DocumentParse(String),

    #[error("similarity threshold {0} is outside [0.0, 1.0]")]
    InvalidThreshold(f32),

    /// The embedding collaborator could not be loaded or failed during a call.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The collaborator answered, but the answer breaks its contract.
    #[error("embedding contract violated: {0}")]
    EmbeddingContract(String),

    /// Serializing the filtered document failed or touched structure outside the removed units.
    #[error("output error: {0}")]
    Output(String),
}

/// Errors reported by an [`crate::embedding::Embedder`].
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding model not available: {0}")]
    Unavailable(String),

    #[error("embedding failed: {0}")]
    Failed(String),
}

impl From<EmbedError> for CleanError {
    fn from(err: EmbedError) -> Self {
        CleanError::EmbeddingUnavailable(err.to_string())
    }
}
