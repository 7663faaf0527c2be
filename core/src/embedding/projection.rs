use super::{features, Embedder, Embedding};
use crate::{
    error::{ClaimError, ClaimResult},
    rng::{WeightRng, WeightSlot},
};
use serde::{Deserialize, Serialize};

/// Weights of the linear projection model.
///
/// `text` is `text_dim x feature_dim`, `image` is `image_dim x feature_dim`,
/// both row-major. A trained artifact is a JSON file of this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectionWeights {
    pub version: String,
    pub feature_dim: usize,
    pub text: Vec<Vec<f32>>,
    pub image: Vec<Vec<f32>>,
}

impl ProjectionWeights {
    /// Random-projection weights drawn from `seed`.
    pub fn seeded(seed: u64, text_dim: usize, image_dim: usize, feature_dim: usize) -> Self {
        Self {
            version: format!("seed{seed}/f{feature_dim}"),
            feature_dim,
            text: WeightRng::new(seed, WeightSlot::TextProjection).matrix(text_dim, feature_dim),
            image: WeightRng::new(seed, WeightSlot::ImageProjection).matrix(image_dim, feature_dim),
        }
    }

    pub fn load(path: &str) -> ClaimResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClaimError::Config(format!("Cannot read weights {path}: {e}")))?;
        let weights: ProjectionWeights = serde_json::from_str(&content)?;
        log::info!(
            "loaded projection weights {} from {path} (features={})",
            weights.version,
            weights.feature_dim
        );
        Ok(weights)
    }

    fn check_shape(&self, name: &str, matrix: &[Vec<f32>], rows: usize) -> ClaimResult<()> {
        if matrix.len() != rows {
            return Err(ClaimError::Config(format!(
                "{name} weights have {} rows, expected {rows}",
                matrix.len()
            )));
        }
        if let Some(bad) = matrix.iter().position(|row| row.len() != self.feature_dim) {
            return Err(ClaimError::Config(format!(
                "{name} weights row {bad} has {} columns, expected {}",
                matrix[bad].len(),
                self.feature_dim
            )));
        }
        Ok(())
    }
}

/// Model-backed embedder: hashed features projected through learned
/// (or seeded) weight matrices.
#[derive(Debug, Clone)]
pub struct ProjectionEmbedder {
    weights: ProjectionWeights,
    version: String,
}

impl ProjectionEmbedder {
    pub fn new(weights: ProjectionWeights, text_dim: usize, image_dim: usize) -> ClaimResult<Self> {
        if weights.feature_dim == 0 {
            return Err(ClaimError::Config("projection feature_dim must be non-zero".into()));
        }
        weights.check_shape("text", &weights.text, text_dim)?;
        weights.check_shape("image", &weights.image, image_dim)?;
        let version = format!("projection-{}/t{text_dim}/i{image_dim}", weights.version);
        Ok(Self { weights, version })
    }

    fn project(matrix: &[Vec<f32>], features: &[f32]) -> Embedding {
        if features.iter().all(|f| *f == 0.0) {
            return Embedding::degenerate(matrix.len());
        }
        let raw = matrix
            .iter()
            .map(|row| {
                row.iter()
                    .zip(features)
                    .map(|(w, f)| (*w as f64) * (*f as f64))
                    .sum::<f64>() as f32
            })
            .collect();
        Embedding::from_raw(raw)
    }
}

impl Embedder for ProjectionEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    fn text_dim(&self) -> usize {
        self.weights.text.len()
    }

    fn image_dim(&self) -> usize {
        self.weights.image.len()
    }

    fn embed_text(&self, text: &str) -> ClaimResult<Embedding> {
        let features = features::text_features(text, self.weights.feature_dim);
        Ok(Self::project(&self.weights.text, &features))
    }

    fn embed_image(&self, bytes: &[u8]) -> ClaimResult<Embedding> {
        let features = features::image_features(bytes, self.weights.feature_dim);
        Ok(Self::project(&self.weights.image, &features))
    }
}
