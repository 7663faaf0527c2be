use super::{features, Embedder, Embedding};
use crate::error::ClaimResult;

/// Deterministic fallback embedder: signed feature hashing straight into
/// the output dimensions. Needs no model artifact.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    text_dim: usize,
    image_dim: usize,
    version: String,
}

impl HashingEmbedder {
    pub fn new(text_dim: usize, image_dim: usize) -> Self {
        Self {
            text_dim,
            image_dim,
            version: format!("hashing-v1/t{text_dim}/i{image_dim}"),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    fn text_dim(&self) -> usize {
        self.text_dim
    }

    fn image_dim(&self) -> usize {
        self.image_dim
    }

    fn embed_text(&self, text: &str) -> ClaimResult<Embedding> {
        Ok(Embedding::from_raw(features::text_features(text, self.text_dim)))
    }

    fn embed_image(&self, bytes: &[u8]) -> ClaimResult<Embedding> {
        Ok(Embedding::from_raw(features::image_features(bytes, self.image_dim)))
    }
}
