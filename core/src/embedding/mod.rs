//! Embedding generation for claim text and images.
//!
//! RULE: Embedders are deterministic. Identical input always yields a
//! bit-identical vector, and every vector is L2-normalized or all-zero.
//!
//! Degenerate input (empty text, no usable images) never fails. It yields
//! the all-zero vector of the configured dimension, `degenerate = true`,
//! and a recorded EmbeddingError. Only a faulty model returns Err.

mod features;
mod hashing;
mod projection;

pub use features::{image_features, stable_hash, text_features, tokenize};
pub use hashing::HashingEmbedder;
pub use projection::{ProjectionEmbedder, ProjectionWeights};

use crate::{
    config::EmbedderConfig,
    error::{ClaimError, ClaimResult, EmbeddingError},
    media::sniff_format,
    types::Vector,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vector,
    /// True when the vector is the all-zero placeholder.
    pub degenerate: bool,
}

impl Embedding {
    pub fn degenerate(dim: usize) -> Self {
        Self {
            vector: vec![0.0; dim],
            degenerate: true,
        }
    }

    /// Normalize `vector`; an all-zero input becomes the degenerate embedding.
    pub fn from_raw(mut vector: Vector) -> Self {
        let degenerate = !normalize(&mut vector);
        Self { vector, degenerate }
    }
}

/// The contract every embedder must fulfill.
pub trait Embedder: Send + Sync {
    /// Tag stored on every fingerprint. Must change whenever vectors change.
    fn model_version(&self) -> &str;

    fn text_dim(&self) -> usize;

    fn image_dim(&self) -> usize;

    fn embed_text(&self, text: &str) -> ClaimResult<Embedding>;

    fn embed_image(&self, bytes: &[u8]) -> ClaimResult<Embedding>;
}

/// Build the embedder named by configuration.
pub fn build_embedder(config: &EmbedderConfig) -> ClaimResult<Box<dyn Embedder>> {
    match config {
        EmbedderConfig::Hashing { text_dim, image_dim } => {
            Ok(Box::new(HashingEmbedder::new(*text_dim, *image_dim)))
        }
        EmbedderConfig::Projection {
            text_dim,
            image_dim,
            feature_dim,
            seed,
            weights_path,
        } => {
            let weights = match weights_path {
                Some(path) => ProjectionWeights::load(path)?,
                None => ProjectionWeights::seeded(*seed, *text_dim, *image_dim, *feature_dim),
            };
            Ok(Box::new(ProjectionEmbedder::new(weights, *text_dim, *image_dim)?))
        }
    }
}

/// Scale `vector` to unit length in place. Returns false (and leaves the
/// vector all-zero) when it has no magnitude.
pub fn normalize(vector: &mut [f32]) -> bool {
    let norm_sq: f64 = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum();
    if norm_sq == 0.0 || !norm_sq.is_finite() {
        vector.iter_mut().for_each(|v| *v = 0.0);
        return false;
    }
    let norm = norm_sq.sqrt();
    for v in vector.iter_mut() {
        *v = (*v as f64 / norm) as f32;
    }
    true
}

/// Text and image embeddings for one claim, plus what went wrong on the way.
#[derive(Debug, Clone)]
pub struct MediaEmbedding {
    pub text: Embedding,
    pub image: Embedding,
    pub images_used: usize,
    pub issues: Vec<EmbeddingError>,
}

impl MediaEmbedding {
    pub fn low_confidence(&self) -> bool {
        self.text.degenerate || self.image.degenerate
    }
}

/// Embed a claim's description and images.
///
/// Empty or unrecognized image payloads are skipped. Accepted image
/// embeddings are averaged and re-normalized into one vector.
pub fn embed_claim_media(
    embedder: &dyn Embedder,
    description: &str,
    images: &[Vec<u8>],
) -> ClaimResult<MediaEmbedding> {
    let mut issues = Vec::new();

    let text = embedder.embed_text(description)?;
    check_dim("text", embedder.text_dim(), &text)?;
    if text.degenerate {
        issues.push(EmbeddingError::EmptyText);
    }

    let mut accepted: Vec<Vector> = Vec::new();
    for (index, bytes) in images.iter().enumerate() {
        if bytes.is_empty() {
            issues.push(EmbeddingError::EmptyImage { index });
            continue;
        }
        if sniff_format(bytes).is_none() {
            issues.push(EmbeddingError::UnrecognizedImage { index });
            continue;
        }
        let embedding = embedder.embed_image(bytes)?;
        check_dim("image", embedder.image_dim(), &embedding)?;
        if embedding.degenerate {
            issues.push(EmbeddingError::EmptyImage { index });
            continue;
        }
        accepted.push(embedding.vector);
    }

    let images_used = accepted.len();
    let image = match accepted.len() {
        0 => {
            issues.push(EmbeddingError::NoImages);
            Embedding::degenerate(embedder.image_dim())
        }
        1 => Embedding {
            vector: accepted.remove(0),
            degenerate: false,
        },
        _ => {
            let mut sum = vec![0.0f32; embedder.image_dim()];
            for vector in &accepted {
                for (acc, v) in sum.iter_mut().zip(vector) {
                    *acc += *v;
                }
            }
            Embedding::from_raw(sum)
        }
    };

    for issue in &issues {
        log::warn!("embedding: {issue}");
    }

    Ok(MediaEmbedding {
        text,
        image,
        images_used,
        issues,
    })
}

fn check_dim(channel: &'static str, expected: usize, embedding: &Embedding) -> ClaimResult<()> {
    if embedding.vector.len() != expected {
        return Err(ClaimError::Model(format!(
            "{channel} embedder returned {} dimensions, configured for {expected}",
            embedding.vector.len()
        )));
    }
    Ok(())
}
