//! Four-channel similarity between fingerprint records.
//!
//! RULES:
//!   - Records are only compared under an identical embedding model version.
//!   - A candidate that cannot be compared is skipped, never fatal.
//!   - The engine scores what it is given; candidate selection is the caller's.

use crate::{
    error::{ClaimError, ClaimResult},
    fingerprint::FingerprintRecord,
    types::FingerprintId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ── Channel weights ───────────────────────────────────────────────

/// Blend weights per channel. Product policy: visual evidence is the
/// strongest fraud signal, then narrative text, with location and time
/// as corroboration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    pub image: f64,
    pub text: f64,
    pub spatial: f64,
    pub temporal: f64,
}

pub const CHANNEL_WEIGHTS: ChannelWeights = ChannelWeights {
    image: 0.35,
    text: 0.25,
    spatial: 0.20,
    temporal: 0.20,
};

impl ChannelWeights {
    pub fn total(&self) -> f64 {
        self.image + self.text + self.spatial + self.temporal
    }

    pub fn blend(&self, image: f64, text: f64, spatial: f64, temporal: f64) -> f64 {
        let blended = self.image * image
            + self.text * text
            + self.spatial * spatial
            + self.temporal * temporal;
        blended.clamp(0.0, 1.0)
    }
}

// ── Breakdown ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub image: f64,
    pub text: f64,
    pub spatial: f64,
    pub temporal: f64,
    pub blended_score: f64,
    pub matched_fingerprint_id: FingerprintId,
    pub matched_claim_reference_id: String,
    pub matched_stored_at: DateTime<Utc>,
}

/// Candidates that could not be compared, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub fingerprint_id: FingerprintId,
    pub reason: String,
}

/// Result of matching one query against a candidate set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    /// Matches at or above the relevance floor, best first, truncated.
    pub matches: Vec<SimilarityBreakdown>,
    /// Every candidate at or above the floor, before truncation.
    pub matched_count: usize,
    pub compared: usize,
    pub skipped: Vec<SkippedCandidate>,
}

impl MatchSet {
    pub fn top(&self) -> Option<&SimilarityBreakdown> {
        self.matches.first()
    }
}

// ── Vector math ───────────────────────────────────────────────────

/// Cosine similarity mapped from [-1, 1] onto [0, 1].
/// A zero-norm vector carries no evidence and scores 0.0.
pub fn cosine_unit(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = (dot / (norm_a * norm_b).sqrt()).clamp(-1.0, 1.0);
    (cos + 1.0) / 2.0
}

// ── Engine ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    weights: ChannelWeights,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self {
            weights: CHANNEL_WEIGHTS,
        }
    }

    pub fn weights(&self) -> &ChannelWeights {
        &self.weights
    }

    /// Compare `query` against one stored `candidate`.
    pub fn compare(
        &self,
        candidate: &FingerprintRecord,
        query: &FingerprintRecord,
    ) -> ClaimResult<SimilarityBreakdown> {
        if candidate.embedding_model_version != query.embedding_model_version {
            return Err(ClaimError::VersionMismatch {
                expected: query.embedding_model_version.clone(),
                actual: candidate.embedding_model_version.clone(),
            });
        }
        check_dims("image", &query.image_embedding, &candidate.image_embedding)?;
        check_dims("text", &query.text_embedding, &candidate.text_embedding)?;

        let image = cosine_unit(&query.image_embedding, &candidate.image_embedding);
        let text = cosine_unit(&query.text_embedding, &candidate.text_embedding);
        let spatial = query
            .spatial_fingerprint
            .similarity(&candidate.spatial_fingerprint);
        let temporal = query
            .temporal_fingerprint
            .similarity(&candidate.temporal_fingerprint);

        Ok(SimilarityBreakdown {
            image,
            text,
            spatial,
            temporal,
            blended_score: self.weights.blend(image, text, spatial, temporal),
            matched_fingerprint_id: candidate.id.clone(),
            matched_claim_reference_id: candidate.claim_reference_id.clone(),
            matched_stored_at: candidate.stored_at,
        })
    }

    /// Score every candidate, keep those with `blended_score >= floor`,
    /// best first. Ties go to the most recently stored candidate, then to
    /// the smaller fingerprint id so the order is total.
    pub fn find_similar_incidents(
        &self,
        query: &FingerprintRecord,
        candidates: &[FingerprintRecord],
        relevance_floor: f64,
        max_matches: usize,
    ) -> MatchSet {
        let mut set = MatchSet::default();
        let mut matches = Vec::new();

        for candidate in candidates {
            if candidate.id == query.id
                || candidate.claim_reference_id == query.claim_reference_id
            {
                continue;
            }
            match self.compare(candidate, query) {
                Ok(breakdown) => {
                    set.compared += 1;
                    log::debug!(
                        "compare {} vs {}: blended={:.3} image={:.3} text={:.3} spatial={:.3} temporal={:.3}",
                        query.claim_reference_id,
                        candidate.id,
                        breakdown.blended_score,
                        breakdown.image,
                        breakdown.text,
                        breakdown.spatial,
                        breakdown.temporal,
                    );
                    if breakdown.blended_score >= relevance_floor {
                        matches.push(breakdown);
                    }
                }
                Err(e) => {
                    log::warn!("skipping candidate {}: {e}", candidate.id);
                    set.skipped.push(SkippedCandidate {
                        fingerprint_id: candidate.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        matches.sort_by(rank_order);
        set.matched_count = matches.len();
        matches.truncate(max_matches);
        set.matches = matches;
        set
    }
}

/// Blended score descending, then newest first, then id ascending.
pub fn rank_order(a: &SimilarityBreakdown, b: &SimilarityBreakdown) -> Ordering {
    b.blended_score
        .partial_cmp(&a.blended_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.matched_stored_at.cmp(&a.matched_stored_at))
        .then_with(|| a.matched_fingerprint_id.cmp(&b.matched_fingerprint_id))
}

fn check_dims(channel: &'static str, query: &[f32], candidate: &[f32]) -> ClaimResult<()> {
    if query.len() != candidate.len() {
        return Err(ClaimError::DimensionMismatch {
            channel,
            expected: query.len(),
            actual: candidate.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FingerprintCode, IncidentType};
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(
        id: &str,
        image: Vec<f32>,
        text: Vec<f32>,
        spatial: u64,
        temporal: u64,
    ) -> FingerprintRecord {
        FingerprintRecord {
            id: id.into(),
            claim_reference_id: format!("CLM-{id}"),
            image_embedding: image,
            text_embedding: text,
            spatial_fingerprint: FingerprintCode::new(spatial, 32),
            temporal_fingerprint: FingerprintCode::new(temporal, 6),
            incident_type: IncidentType::MotorCollision,
            damage_severity_score: 0.5,
            embedding_model_version: "test-v1".into(),
            low_confidence: false,
            stored_at: base_time(),
        }
    }

    #[test]
    fn weights_table_sums_to_one() {
        assert!((CHANNEL_WEIGHTS.total() - 1.0).abs() < 1e-12);
        assert_eq!(CHANNEL_WEIGHTS.image, 0.35);
        assert_eq!(CHANNEL_WEIGHTS.text, 0.25);
        assert_eq!(CHANNEL_WEIGHTS.spatial, 0.20);
        assert_eq!(CHANNEL_WEIGHTS.temporal, 0.20);
    }

    #[test]
    fn cosine_maps_onto_unit_interval() {
        assert_eq!(cosine_unit(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_unit(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_unit(&[1.0, 0.0], &[0.0, 1.0]), 0.5);
        assert_eq!(cosine_unit(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn self_similarity_is_one_on_every_channel() {
        let a = record("a", vec![0.3, -0.2, 0.9], vec![0.1, 0.7, -0.7], 0xDEAD_BEEF, 0b101101);
        let b = FingerprintRecord {
            id: "copy".into(),
            ..a.clone()
        };
        let s = SimilarityEngine::new().compare(&b, &a).unwrap();
        assert_eq!(s.image, 1.0);
        assert_eq!(s.text, 1.0);
        assert_eq!(s.spatial, 1.0);
        assert_eq!(s.temporal, 1.0);
        assert_eq!(s.blended_score, 1.0);
    }

    #[test]
    fn comparison_is_symmetric() {
        let a = record("a", vec![0.3, -0.2, 0.9], vec![0.1, 0.7, -0.7], 0xF0F0_0000, 0b000111);
        let b = record("b", vec![-0.5, 0.4, 0.1], vec![0.6, 0.2, 0.3], 0x0FF0_00FF, 0b010101);
        let engine = SimilarityEngine::new();
        let ab = engine.compare(&a, &b).unwrap();
        let ba = engine.compare(&b, &a).unwrap();
        assert_eq!(ab.blended_score, ba.blended_score);
        assert_eq!(ab.image, ba.image);
        assert_eq!(ab.spatial, ba.spatial);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let a = record("a", vec![1.0], vec![1.0], 0, 0);
        let mut b = record("b", vec![1.0], vec![1.0], 0, 0);
        b.embedding_model_version = "test-v2".into();
        let err = SimilarityEngine::new().compare(&b, &a).unwrap_err();
        assert!(matches!(err, ClaimError::VersionMismatch { .. }));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let a = record("a", vec![1.0, 0.0], vec![1.0], 0, 0);
        let b = record("b", vec![1.0], vec![1.0], 0, 0);
        let err = SimilarityEngine::new().compare(&b, &a).unwrap_err();
        assert!(matches!(err, ClaimError::DimensionMismatch { channel: "image", .. }));
    }

    #[test]
    fn incompatible_candidates_are_skipped_not_fatal() {
        let query = record("q", vec![1.0, 0.0], vec![1.0, 0.0], 7, 3);
        let good = record("good", vec![1.0, 0.0], vec![1.0, 0.0], 7, 3);
        let mut old_model = good.clone();
        old_model.id = "old".into();
        old_model.claim_reference_id = "CLM-old".into();
        old_model.embedding_model_version = "legacy".into();

        let set =
            SimilarityEngine::new().find_similar_incidents(&query, &[old_model, good], 0.5, 10);
        assert_eq!(set.matched_count, 1);
        assert_eq!(set.compared, 1);
        assert_eq!(set.skipped.len(), 1);
        assert_eq!(set.skipped[0].fingerprint_id, "old");
    }

    #[test]
    fn floor_is_inclusive_and_results_sorted() {
        let query = record("q", vec![1.0, 0.0], vec![1.0, 0.0], 0, 0);
        // Orthogonal vectors, identical codes: 0.35*.5 + 0.25*.5 + 0.2 + 0.2 = 0.7
        let mid = record("mid", vec![0.0, 1.0], vec![0.0, 1.0], 0, 0);
        let best = record("best", vec![1.0, 0.0], vec![1.0, 0.0], 0, 0);
        // Opposite vectors, every code bit flipped: 0.0
        let none = record("none", vec![-1.0, 0.0], vec![-1.0, 0.0], u64::MAX, u64::MAX);

        let engine = SimilarityEngine::new();
        let set = engine.find_similar_incidents(&query, &[mid.clone(), none, best], 0.5, 10);
        let ids: Vec<_> = set.matches.iter().map(|m| m.matched_fingerprint_id.as_str()).collect();
        assert_eq!(ids, vec!["best", "mid"]);

        let mid_score = engine.compare(&mid, &query).unwrap().blended_score;
        let at_floor = engine.find_similar_incidents(&query, &[mid], mid_score, 10);
        assert_eq!(at_floor.matched_count, 1);
    }

    #[test]
    fn ties_go_to_the_most_recent_candidate() {
        let query = record("q", vec![1.0, 0.0], vec![1.0, 0.0], 1, 1);
        let mut older = record("older", vec![1.0, 0.0], vec![1.0, 0.0], 1, 1);
        older.stored_at = base_time() - Duration::days(30);
        let mut newer = record("newer", vec![1.0, 0.0], vec![1.0, 0.0], 1, 1);
        newer.stored_at = base_time() - Duration::days(2);

        let set = SimilarityEngine::new().find_similar_incidents(&query, &[older, newer], 0.5, 10);
        assert_eq!(set.matches[0].blended_score, set.matches[1].blended_score);
        assert_eq!(set.matches[0].matched_fingerprint_id, "newer");
        assert_eq!(set.matches[1].matched_fingerprint_id, "older");
    }

    #[test]
    fn truncation_keeps_full_match_count() {
        let query = record("q", vec![1.0, 0.0], vec![1.0, 0.0], 1, 1);
        let candidates: Vec<_> = (0..5)
            .map(|i| record(&format!("c{i}"), vec![1.0, 0.0], vec![1.0, 0.0], 1, 1))
            .collect();
        let set = SimilarityEngine::new().find_similar_incidents(&query, &candidates, 0.5, 2);
        assert_eq!(set.matched_count, 5);
        assert_eq!(set.matches.len(), 2);
    }

    #[test]
    fn query_never_matches_itself() {
        let query = record("q", vec![1.0, 0.0], vec![1.0, 0.0], 1, 1);
        let set = SimilarityEngine::new().find_similar_incidents(&query, &[query.clone()], 0.0, 10);
        assert_eq!(set.matched_count, 0);
        assert_eq!(set.compared, 0);
    }
}
