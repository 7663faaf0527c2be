//! Read-only aggregates for the admin view.

use super::ClaimStore;
use crate::{error::ClaimResult, scoring::RiskLevel};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskLevelCount {
    pub risk_level: RiskLevel,
    pub count: u64,
}

impl ClaimStore {
    pub fn fingerprint_count(&self) -> ClaimResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fingerprint", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn fingerprint_count_for_version(&self, model_version: &str) -> ClaimResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fingerprint WHERE embedding_model_version = ?1",
            params![model_version],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn analysis_count(&self) -> ClaimResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_result", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// One entry per risk level, LOW to CRITICAL, zero-filled.
    pub fn risk_level_counts(&self) -> ClaimResult<Vec<RiskLevelCount>> {
        let mut counts: Vec<RiskLevelCount> = [
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ]
        .into_iter()
        .map(|risk_level| RiskLevelCount { risk_level, count: 0 })
        .collect();

        let mut stmt = self.conn.prepare(
            "SELECT fraud_risk_level, COUNT(*) FROM analysis_result
             GROUP BY fraud_risk_level",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (label, n) = row?;
            match RiskLevel::parse(&label) {
                Some(level) => {
                    if let Some(c) = counts.iter_mut().find(|c| c.risk_level == level) {
                        c.count = n as u64;
                    }
                }
                None => log::warn!("unrecognized risk level '{label}' in analysis_result"),
            }
        }
        Ok(counts)
    }
}
