//! The claim pipeline, one synchronous invocation per claim.
//!
//! STATE ORDER (fixed, never reordered):
//!   RECEIVED → FINGERPRINTED → MATCHED → SCORED → PERSISTED → COMPLETED
//!   Any unrecoverable error moves the claim to FAILED.
//!
//! RULES:
//!   - A claim reference produces at most one stored fingerprint.
//!     A repeat submission returns the stored report instead.
//!   - Nothing is retried here. Retry policy belongs to the caller.
//!   - Storage is only touched through the injected repository, and the
//!     caller's CancelToken is checked before every storage call.
//!   - Time is read from the injected Clock only.

use crate::{
    cancel::CancelToken,
    clock::{Clock, SystemClock},
    config::PipelineConfig,
    embedding::{build_embedder, embed_claim_media, Embedder},
    error::{ClaimError, ClaimResult},
    fingerprint::{ClaimMetadata, FingerprintBuilder, FingerprintRecord, IncidentType},
    report::{AnalysisRecord, ClaimReport, TopMatch},
    repository::{CandidateFilter, FingerprintRepository},
    scoring::{FraudAnalysisOutcome, FraudScorer},
    similarity::SimilarityEngine,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Instant};

// ── Input / output ────────────────────────────────────────────────

/// One claim as handed over by the submission handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSubmission {
    pub metadata: ClaimMetadata,
    pub images: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimState {
    Received,
    Fingerprinted,
    Matched,
    Scored,
    Persisted,
    Completed,
    Failed,
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Fingerprinted => "FINGERPRINTED",
            Self::Matched => "MATCHED",
            Self::Scored => "SCORED",
            Self::Persisted => "PERSISTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    pub report: ClaimReport,
    /// States visited, in order.
    pub states: Vec<ClaimState>,
    /// True when the report was read back from a prior submission.
    pub replayed: bool,
}

/// A claim that ended in FAILED. `stage` is the last state reached.
#[derive(thiserror::Error, Debug)]
#[error("claim failed after {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: ClaimState,
    #[source]
    pub error: ClaimError,
}

/// Tracks the state machine for one claim.
struct Progress {
    states: Vec<ClaimState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            states: vec![ClaimState::Received],
        }
    }

    fn advance(&mut self, state: ClaimState) {
        self.states.push(state);
    }

    fn current(&self) -> ClaimState {
        self.states.last().copied().unwrap_or(ClaimState::Received)
    }

    fn fail(&self, error: ClaimError) -> PipelineFailure {
        PipelineFailure {
            stage: self.current(),
            error,
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────

pub struct ClaimOrchestrator<R: FingerprintRepository> {
    repo: R,
    embedder: Box<dyn Embedder>,
    builder: FingerprintBuilder,
    engine: SimilarityEngine,
    scorer: FraudScorer,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl<R: FingerprintRepository> ClaimOrchestrator<R> {
    /// Wire a pipeline from configuration, with the system clock.
    pub fn build(repo: R, config: PipelineConfig) -> ClaimResult<Self> {
        config.validate()?;
        let embedder = build_embedder(&config.embedder)?;
        let scorer = FraudScorer::new(config.scoring.clone());
        Ok(Self::new(repo, embedder, scorer, Arc::new(SystemClock), config))
    }

    pub fn new(
        repo: R,
        embedder: Box<dyn Embedder>,
        scorer: FraudScorer,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            embedder,
            builder: FingerprintBuilder::new(),
            engine: SimilarityEngine::new(),
            scorer,
            clock,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn model_version(&self) -> &str {
        self.embedder.model_version()
    }

    /// Run one claim through the pipeline.
    pub fn process(
        &self,
        submission: &ClaimSubmission,
        cancel: &CancelToken,
    ) -> Result<ClaimOutcome, PipelineFailure> {
        let started = Instant::now();
        let claim_ref = submission.metadata.claim_reference_id.trim().to_string();
        let mut progress = Progress::new();

        match self.run(submission, &claim_ref, cancel, started, &mut progress, true) {
            Ok(outcome) => {
                let r = &outcome.report;
                log::info!(
                    "claim {claim_ref}: {} ({:.3}) -> {} in {}ms{}",
                    r.fraud_risk_level,
                    r.fraud_risk_score,
                    r.recommendation,
                    started.elapsed().as_millis(),
                    if outcome.replayed { " [replayed]" } else { "" }
                );
                log::info!(
                    target: "audit",
                    "claim={claim_ref} fingerprint={} state=COMPLETED level={} recommendation={} matches={} replayed={}",
                    r.fingerprint_id,
                    r.fraud_risk_level,
                    r.recommendation,
                    r.matched_incidents_count,
                    outcome.replayed
                );
                Ok(outcome)
            }
            Err(failure) => {
                log::warn!("claim {claim_ref}: {failure}");
                log::info!(
                    target: "audit",
                    "claim={claim_ref} state=FAILED stage={} error={}",
                    failure.stage,
                    failure.error
                );
                Err(failure)
            }
        }
    }

    fn run(
        &self,
        submission: &ClaimSubmission,
        claim_ref: &str,
        cancel: &CancelToken,
        started: Instant,
        progress: &mut Progress,
        rescore_on_race: bool,
    ) -> Result<ClaimOutcome, PipelineFailure> {
        self.check_intake(submission).map_err(|e| progress.fail(e))?;

        // ── Idempotency ───────────────────────────────────────────
        cancel.check().map_err(|e| progress.fail(e))?;
        if let Some(prior) = self
            .repo
            .find_analysis_by_claim_ref(claim_ref)
            .map_err(|e| progress.fail(e))?
        {
            log::debug!("claim {claim_ref}: already analysed, returning stored report");
            return Ok(replayed(prior.report));
        }
        cancel.check().map_err(|e| progress.fail(e))?;
        let existing = self
            .repo
            .find_fingerprint_by_claim_ref(claim_ref)
            .map_err(|e| progress.fail(e))?;

        // ── RECEIVED → FINGERPRINTED ──────────────────────────────
        let media = embed_claim_media(
            self.embedder.as_ref(),
            &submission.metadata.damage_description,
            &submission.images,
        )
        .map_err(|e| progress.fail(e))?;

        let reused = existing.is_some();
        let record = match existing {
            // Fingerprint stored without its analysis: score that record, never a second one.
            Some(stored) => {
                log::warn!(
                    "claim {claim_ref}: fingerprint {} has no analysis, rescoring it",
                    stored.id
                );
                stored
            }
            None => {
                let meta = self
                    .builder
                    .build(&submission.metadata, media.images_used)
                    .map_err(|e| progress.fail(e))?;
                FingerprintRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    claim_reference_id: claim_ref.to_string(),
                    image_embedding: media.image.vector.clone(),
                    text_embedding: media.text.vector.clone(),
                    spatial_fingerprint: meta.spatial,
                    temporal_fingerprint: meta.temporal,
                    incident_type: meta.incident_type,
                    damage_severity_score: meta.damage_severity_score,
                    embedding_model_version: self.embedder.model_version().to_string(),
                    low_confidence: media.low_confidence(),
                    stored_at: self.clock.now(),
                }
            }
        };
        progress.advance(ClaimState::Fingerprinted);
        log::debug!(
            "claim {claim_ref}: fingerprint {} spatial={} temporal={} severity={:.3} low_confidence={}",
            record.id,
            record.spatial_fingerprint,
            record.temporal_fingerprint,
            record.damage_severity_score,
            record.low_confidence
        );

        // ── FINGERPRINTED → MATCHED ───────────────────────────────
        let filter = CandidateFilter {
            incident_type: self
                .config
                .candidates
                .same_incident_type_only
                .then_some(record.incident_type),
            exclude_claim_ref: Some(claim_ref.to_string()),
            limit: self.config.candidates.window_limit,
        };
        cancel.check().map_err(|e| progress.fail(e))?;
        let candidates = self
            .repo
            .fetch_candidate_fingerprints(&filter)
            .map_err(|e| progress.fail(e))?;
        let matches = self.engine.find_similar_incidents(
            &record,
            &candidates,
            self.config.scoring.relevance_floor,
            self.config.scoring.max_matches,
        );
        progress.advance(ClaimState::Matched);
        log::debug!(
            "claim {claim_ref}: {} candidates, {} compared, {} matched, {} skipped",
            candidates.len(),
            matches.compared,
            matches.matched_count,
            matches.skipped.len()
        );

        // ── MATCHED → SCORED ──────────────────────────────────────
        let outcome = self.scorer.score(&matches, &record);
        progress.advance(ClaimState::Scored);

        let top_match = outcome.top_match.as_ref().map(|b| {
            let matched_incident_type = candidates
                .iter()
                .find(|c| c.id == b.matched_fingerprint_id)
                .map(|c| c.incident_type)
                .unwrap_or(IncidentType::Unknown);
            TopMatch {
                breakdown: b.clone(),
                matched_incident_type,
                days_since_matched_incident: (record.stored_at - b.matched_stored_at)
                    .num_days()
                    .max(0),
            }
        });
        let report = build_report(
            &record,
            outcome,
            top_match,
            media.issues,
            started.elapsed().as_millis() as u64,
            self.clock.now(),
        );
        let analysis = AnalysisRecord::new(report, matches.matches);

        // ── SCORED → PERSISTED ────────────────────────────────────
        cancel.check().map_err(|e| progress.fail(e))?;
        let persisted = if reused {
            self.repo.insert_analysis_result(&analysis).map(|_| record.id.clone())
        } else {
            self.repo.persist_analysis(&record, &analysis)
        };
        match persisted {
            Ok(_) => {}
            Err(ClaimError::DuplicateClaim { .. }) => {
                // Lost a race with a concurrent submission of the same claim.
                log::info!("claim {claim_ref}: concurrent submission won, returning its report");
                if let Some(prior) = self.read_back(claim_ref, cancel, progress)? {
                    return Ok(replayed(prior));
                }
                if reused || !rescore_on_race {
                    return Err(progress.fail(ClaimError::DuplicateClaim {
                        claim_reference_id: claim_ref.to_string(),
                    }));
                }
                // The winner's fingerprint is stored but its analysis is not.
                log::warn!("claim {claim_ref}: winner has no analysis yet, scoring it");
                *progress = Progress::new();
                return self.run(submission, claim_ref, cancel, started, progress, false);
            }
            Err(e) => return Err(progress.fail(e)),
        }
        progress.advance(ClaimState::Persisted);
        progress.advance(ClaimState::Completed);

        Ok(ClaimOutcome {
            report: analysis.report,
            states: progress.states.clone(),
            replayed: false,
        })
    }

    /// Structural limits the submission handler does not enforce.
    fn check_intake(&self, submission: &ClaimSubmission) -> ClaimResult<()> {
        let limits = &self.config.intake;
        if submission.images.len() > limits.max_images {
            return Err(ClaimError::validation(
                "images",
                format!(
                    "{} images exceeds the limit of {}",
                    submission.images.len(),
                    limits.max_images
                ),
            ));
        }
        if let Some((i, img)) = submission
            .images
            .iter()
            .enumerate()
            .find(|(_, img)| img.len() > limits.max_image_bytes)
        {
            return Err(ClaimError::validation(
                "images",
                format!("image {i} is {} bytes, limit is {}", img.len(), limits.max_image_bytes),
            ));
        }
        let chars = submission.metadata.damage_description.chars().count();
        if chars > limits.max_description_chars {
            return Err(ClaimError::validation(
                "damage_description",
                format!("{chars} characters exceeds the limit of {}", limits.max_description_chars),
            ));
        }
        FingerprintBuilder::validate(&submission.metadata)
    }

    fn read_back(
        &self,
        claim_ref: &str,
        cancel: &CancelToken,
        progress: &Progress,
    ) -> Result<Option<ClaimReport>, PipelineFailure> {
        cancel.check().map_err(|e| progress.fail(e))?;
        let prior = self
            .repo
            .find_analysis_by_claim_ref(claim_ref)
            .map_err(|e| progress.fail(e))?;
        Ok(prior.map(|a| a.report))
    }
}

fn replayed(report: ClaimReport) -> ClaimOutcome {
    ClaimOutcome {
        report,
        states: vec![ClaimState::Received, ClaimState::Completed],
        replayed: true,
    }
}

fn build_report(
    record: &FingerprintRecord,
    outcome: FraudAnalysisOutcome,
    top_match: Option<TopMatch>,
    embedding_issues: Vec<crate::error::EmbeddingError>,
    processing_time_ms: u64,
    analyzed_at: chrono::DateTime<chrono::Utc>,
) -> ClaimReport {
    ClaimReport {
        claim_reference_id: record.claim_reference_id.clone(),
        fingerprint_id: record.id.clone(),
        fraud_risk_score: outcome.overall_risk_score,
        fraud_risk_level: outcome.risk_level,
        recommendation: outcome.recommendation,
        matched_incidents_count: outcome.matched_count,
        top_match,
        risk_factors: outcome.risk_factors,
        explanation: outcome.explanation,
        processing_time_ms,
        low_confidence: outcome.low_confidence,
        embedding_issues,
        skipped_candidates: outcome.skipped_candidates,
        embedding_model_version: record.embedding_model_version.clone(),
        analyzed_at,
    }
}
