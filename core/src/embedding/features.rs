//! Signed feature hashing over text tokens and image byte blocks.
//!
//! Hashes are SHA-256 based so bucket assignment is stable across
//! platforms and toolchain versions. A persisted corpus depends on it.

use sha2::{Digest, Sha256};

const WORD_WEIGHT: f32 = 2.0;
const BIGRAM_WEIGHT: f32 = 1.5;
const TRIGRAM_WEIGHT: f32 = 1.0;

/// Image payloads are cut into blocks of this many bytes.
pub const IMAGE_BLOCK_BYTES: usize = 64;

/// At most this many blocks are hashed per image; larger payloads are strided.
pub const MAX_IMAGE_BLOCKS: usize = 8192;

/// Stable 64-bit hash of `feature` within `namespace`.
pub fn stable_hash(namespace: &[u8], feature: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(namespace);
    hasher.update([0u8]);
    hasher.update(feature);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Add `weight` to the bucket picked by `hash`, with a sign taken from bit 0.
/// Signed buckets keep unrelated inputs near-orthogonal.
fn accumulate(buckets: &mut [f32], hash: u64, weight: f32) {
    let index = ((hash >> 1) % buckets.len() as u64) as usize;
    if hash & 1 == 0 {
        buckets[index] += weight;
    } else {
        buckets[index] -= weight;
    }
}

/// Lower-cased alphanumeric word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Hashed bag of words, word bigrams and in-word character trigrams.
/// Returns an all-zero vector for text with no tokens.
pub fn text_features(text: &str, dim: usize) -> Vec<f32> {
    let mut buckets = vec![0.0f32; dim];
    if dim == 0 {
        return buckets;
    }
    let words = tokenize(text);

    for word in &words {
        accumulate(&mut buckets, stable_hash(b"w", word.as_bytes()), WORD_WEIGHT);

        let padded: Vec<char> = format!("#{word}#").chars().collect();
        for gram in padded.windows(3) {
            let gram: String = gram.iter().collect();
            accumulate(&mut buckets, stable_hash(b"c3", gram.as_bytes()), TRIGRAM_WEIGHT);
        }
    }
    for pair in words.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        accumulate(&mut buckets, stable_hash(b"w2", bigram.as_bytes()), BIGRAM_WEIGHT);
    }
    buckets
}

/// Hashed bag of fixed-size byte blocks. Identical payloads share every
/// block; lightly edited payloads share most of them.
pub fn image_features(bytes: &[u8], dim: usize) -> Vec<f32> {
    let mut buckets = vec![0.0f32; dim];
    if dim == 0 || bytes.is_empty() {
        return buckets;
    }
    let blocks: Vec<&[u8]> = bytes.chunks(IMAGE_BLOCK_BYTES).collect();
    let stride = blocks.len().div_ceil(MAX_IMAGE_BLOCKS).max(1);

    for block in blocks.iter().step_by(stride) {
        accumulate(&mut buckets, stable_hash(b"img", block), 1.0);
    }
    buckets
}
