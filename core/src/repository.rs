//! Storage collaborator contract.
//!
//! RULES:
//!   - The orchestrator only ever talks to storage through this trait.
//!   - insert_fingerprint must fail with DuplicateClaim when the claim
//!     reference is already stored. That is the idempotency guarantee.
//!   - Fingerprint records are never updated or deleted through it.

use crate::{
    error::ClaimResult,
    fingerprint::{FingerprintRecord, IncidentType},
    report::AnalysisRecord,
    types::FingerprintId,
};

/// Which historical fingerprints to hand to the similarity engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFilter {
    /// Restrict to one incident type.
    pub incident_type: Option<IncidentType>,
    /// Never return this claim's own record.
    pub exclude_claim_ref: Option<String>,
    /// Newest-first cap. None = full corpus.
    pub limit: Option<usize>,
}

pub trait FingerprintRepository {
    fn find_fingerprint_by_claim_ref(
        &self,
        claim_ref: &str,
    ) -> ClaimResult<Option<FingerprintRecord>>;

    /// Candidates newest first.
    fn fetch_candidate_fingerprints(
        &self,
        filter: &CandidateFilter,
    ) -> ClaimResult<Vec<FingerprintRecord>>;

    fn insert_fingerprint(&self, record: &FingerprintRecord) -> ClaimResult<FingerprintId>;

    fn insert_analysis_result(&self, analysis: &AnalysisRecord) -> ClaimResult<()>;

    fn find_analysis_by_claim_ref(&self, claim_ref: &str) -> ClaimResult<Option<AnalysisRecord>>;

    /// Store the fingerprint and its analysis. Implementations that can
    /// should make this atomic; the default is two separate inserts.
    fn persist_analysis(
        &self,
        fingerprint: &FingerprintRecord,
        analysis: &AnalysisRecord,
    ) -> ClaimResult<FingerprintId> {
        let id = self.insert_fingerprint(fingerprint)?;
        self.insert_analysis_result(analysis)?;
        Ok(id)
    }
}

impl<T: FingerprintRepository + ?Sized> FingerprintRepository for &T {
    fn find_fingerprint_by_claim_ref(
        &self,
        claim_ref: &str,
    ) -> ClaimResult<Option<FingerprintRecord>> {
        (**self).find_fingerprint_by_claim_ref(claim_ref)
    }

    fn fetch_candidate_fingerprints(
        &self,
        filter: &CandidateFilter,
    ) -> ClaimResult<Vec<FingerprintRecord>> {
        (**self).fetch_candidate_fingerprints(filter)
    }

    fn insert_fingerprint(&self, record: &FingerprintRecord) -> ClaimResult<FingerprintId> {
        (**self).insert_fingerprint(record)
    }

    fn insert_analysis_result(&self, analysis: &AnalysisRecord) -> ClaimResult<()> {
        (**self).insert_analysis_result(analysis)
    }

    fn find_analysis_by_claim_ref(&self, claim_ref: &str) -> ClaimResult<Option<AnalysisRecord>> {
        (**self).find_analysis_by_claim_ref(claim_ref)
    }

    fn persist_analysis(
        &self,
        fingerprint: &FingerprintRecord,
        analysis: &AnalysisRecord,
    ) -> ClaimResult<FingerprintId> {
        (**self).persist_analysis(fingerprint, analysis)
    }
}
