//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The orchestrator reaches it through FingerprintRepository, never SQL.

use crate::{
    error::{ClaimError, ClaimResult},
    fingerprint::FingerprintRecord,
    report::AnalysisRecord,
    repository::{CandidateFilter, FingerprintRepository},
    types::FingerprintId,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Duration;

mod admin;
mod analysis;
mod fingerprint;

pub use admin::RiskLevelCount;

/// How long a writer waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClaimStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ClaimStore {
    pub fn open(path: &str) -> ClaimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        log::debug!("opened claim store at {path}");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ClaimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a second connection to the same database.
    /// For in-memory databases this is a new, isolated database.
    pub fn reopen(&self) -> ClaimResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ClaimResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_claim_fingerprint.sql"))?;
        Ok(())
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl FingerprintRepository for ClaimStore {
    fn find_fingerprint_by_claim_ref(
        &self,
        claim_ref: &str,
    ) -> ClaimResult<Option<FingerprintRecord>> {
        fingerprint::find_by_claim_ref(&self.conn, claim_ref)
    }

    fn fetch_candidate_fingerprints(
        &self,
        filter: &CandidateFilter,
    ) -> ClaimResult<Vec<FingerprintRecord>> {
        fingerprint::fetch_candidates(&self.conn, filter)
    }

    fn insert_fingerprint(&self, record: &FingerprintRecord) -> ClaimResult<FingerprintId> {
        fingerprint::insert(&self.conn, record)
    }

    fn insert_analysis_result(&self, record: &AnalysisRecord) -> ClaimResult<()> {
        analysis::insert(&self.conn, record)
    }

    fn find_analysis_by_claim_ref(&self, claim_ref: &str) -> ClaimResult<Option<AnalysisRecord>> {
        analysis::find_by_claim_ref(&self.conn, claim_ref)
    }

    /// Both rows commit together or not at all. The write lock is taken
    /// up front so concurrent submissions serialize on the UNIQUE check.
    fn persist_analysis(
        &self,
        record: &FingerprintRecord,
        analysis: &AnalysisRecord,
    ) -> ClaimResult<FingerprintId> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let id = fingerprint::insert(&tx, record)?;
        analysis::insert(&tx, analysis)?;
        tx.commit()?;
        Ok(id)
    }
}

// ── Shared column codecs ──────────────────────────────────────────

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Map a UNIQUE violation on `claim_ref` to DuplicateClaim.
pub(crate) fn insert_error(e: rusqlite::Error, claim_ref: &str) -> ClaimError {
    if is_unique_violation(&e) {
        ClaimError::DuplicateClaim {
            claim_reference_id: claim_ref.to_string(),
        }
    } else {
        ClaimError::Database(e)
    }
}

/// Timestamps are fixed-width RFC 3339 in UTC so text order is time order.
pub(crate) fn timestamp_to_sql(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn timestamp_from_sql(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn json_from_sql<T: serde::de::DeserializeOwned>(
    idx: usize,
    text: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FingerprintCode, IncidentType};
    use chrono::TimeZone;

    fn record(id: &str, claim_ref: &str) -> FingerprintRecord {
        FingerprintRecord {
            id: id.into(),
            claim_reference_id: claim_ref.into(),
            image_embedding: vec![0.6, -0.8, 0.0],
            text_embedding: vec![0.1f32.sqrt(), 0.9f32.sqrt()],
            spatial_fingerprint: FingerprintCode::new(0xCAFE_F00D, 32),
            temporal_fingerprint: FingerprintCode::new(0b110011, 6),
            incident_type: IncidentType::Flood,
            damage_severity_score: 0.4321,
            embedding_model_version: "hashing-v1/t2/i3".into(),
            low_confidence: false,
            stored_at: Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 15).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
        }
    }

    fn store() -> ClaimStore {
        let store = ClaimStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn migrate_is_repeatable() {
        let store = store();
        store.migrate().unwrap();
    }

    #[test]
    fn fingerprint_survives_storage_bit_for_bit() {
        let store = store();
        let rec = record("fp-1", "CLM-1");
        assert_eq!(store.insert_fingerprint(&rec).unwrap(), "fp-1");
        let loaded = store.find_fingerprint_by_claim_ref("CLM-1").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(store.find_fingerprint_by_claim_ref("CLM-404").unwrap().is_none());
    }

    #[test]
    fn duplicate_claim_reference_is_refused() {
        let store = store();
        store.insert_fingerprint(&record("fp-1", "CLM-1")).unwrap();
        let err = store.insert_fingerprint(&record("fp-2", "CLM-1")).unwrap_err();
        assert!(
            matches!(
                err,
                ClaimError::DuplicateClaim { ref claim_reference_id } if claim_reference_id == "CLM-1"
            ),
            "Expected DuplicateClaim, got {err}"
        );
    }

    #[test]
    fn fingerprints_are_append_only() {
        let store = store();
        store.insert_fingerprint(&record("fp-1", "CLM-1")).unwrap();
        assert!(store
            .conn
            .execute("UPDATE fingerprint SET damage_severity_score = 0.9", [])
            .is_err());
        assert!(store.conn.execute("DELETE FROM fingerprint", []).is_err());
    }

    #[test]
    fn unique_violation_detection() {
        let store = store();
        store.insert_fingerprint(&record("fp-1", "CLM-1")).unwrap();
        let raw = store
            .conn
            .execute(
                "INSERT INTO fingerprint (fingerprint_id, claim_reference_id, image_embedding,
                    text_embedding, spatial_bits, spatial_width, temporal_bits, temporal_width,
                    incident_type_code, damage_severity_score, embedding_model_version, stored_at)
                 VALUES ('x', 'CLM-1', x'', x'', 0, 32, 0, 6, 0, 0.5, 'v', 'now')",
                [],
            )
            .unwrap_err();
        assert!(is_unique_violation(&raw));
    }
}
