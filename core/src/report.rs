//! The per-claim report handed back to the submitting caller.
//!
//! RULE: A stored report is returned verbatim on replay. Nothing in it is
//! recomputed once persisted.

use crate::{
    error::EmbeddingError,
    fingerprint::IncidentType,
    scoring::{Recommendation, RiskLevel},
    similarity::SimilarityBreakdown,
    types::{ClaimRef, FingerprintId, ModelVersion},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top match plus what the caller needs to present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopMatch {
    pub breakdown: SimilarityBreakdown,
    pub matched_incident_type: IncidentType,
    pub days_since_matched_incident: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReport {
    pub claim_reference_id: ClaimRef,
    pub fingerprint_id: FingerprintId,
    pub fraud_risk_score: f64,
    pub fraud_risk_level: RiskLevel,
    pub recommendation: Recommendation,
    pub matched_incidents_count: usize,
    pub top_match: Option<TopMatch>,
    pub risk_factors: Vec<String>,
    pub explanation: String,
    /// Intake to report assembly. Excludes the write that stores this report.
    pub processing_time_ms: u64,
    /// Either embedding was degenerate.
    pub low_confidence: bool,
    #[serde(default)]
    pub embedding_issues: Vec<EmbeddingError>,
    #[serde(default)]
    pub skipped_candidates: usize,
    pub embedding_model_version: ModelVersion,
    pub analyzed_at: DateTime<Utc>,
}

/// What the storage collaborator keeps for one analysed claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub claim_reference_id: ClaimRef,
    pub fingerprint_id: FingerprintId,
    pub report: ClaimReport,
    /// Retained matches, best first.
    pub breakdowns: Vec<SimilarityBreakdown>,
}

impl AnalysisRecord {
    pub fn new(report: ClaimReport, breakdowns: Vec<SimilarityBreakdown>) -> Self {
        Self {
            claim_reference_id: report.claim_reference_id.clone(),
            fingerprint_id: report.fingerprint_id.clone(),
            report,
            breakdowns,
        }
    }
}
