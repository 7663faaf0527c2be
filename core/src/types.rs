//! Shared primitive types used across the pipeline.

/// Opaque identifier of a stored fingerprint.
pub type FingerprintId = String;

/// Anonymized claim reference. Unique across the historical corpus.
pub type ClaimRef = String;

/// Tag naming the embedding model that produced a vector.
/// Vectors are only comparable under an identical tag.
pub type ModelVersion = String;

/// Dense embedding vector.
pub type Vector = Vec<f32>;
