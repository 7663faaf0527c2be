use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Invalid claim metadata: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Embedding model version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Embedding dimension mismatch on {channel} channel: expected {expected}, got {actual}")]
    DimensionMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Fingerprint already exists for claim '{claim_reference_id}'")]
    DuplicateClaim { claim_reference_id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Operation cancelled by caller")]
    Cancelled,

    #[error("Caller deadline of {budget_ms}ms exceeded")]
    DeadlineExceeded { budget_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding model failure: {0}")]
    Model(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClaimError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// True for failures of the storage boundary, including caller cancellation.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::StorageUnavailable(_)
                | Self::Cancelled
                | Self::DeadlineExceeded { .. }
        )
    }
}

pub type ClaimResult<T> = Result<T, ClaimError>;

/// Non-fatal problems met while embedding claim media.
///
/// These never abort a claim. They are recorded on the fingerprint draft and
/// surfaced in the report, and they mark the fingerprint as low-confidence.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingError {
    #[error("damage description is empty; text embedding is degenerate")]
    EmptyText,

    #[error("image {index} is empty and was skipped")]
    EmptyImage { index: usize },

    #[error("image {index} is not a recognized image format and was skipped")]
    UnrecognizedImage { index: usize },

    #[error("no usable images; image embedding is degenerate")]
    NoImages,
}
