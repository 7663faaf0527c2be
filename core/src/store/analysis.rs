//! Analysis result queries.

use super::{insert_error, json_from_sql, timestamp_to_sql};
use crate::{error::ClaimResult, report::AnalysisRecord};
use rusqlite::{params, Connection, OptionalExtension};

pub(super) fn insert(conn: &Connection, a: &AnalysisRecord) -> ClaimResult<()> {
    let report_json = serde_json::to_string(&a.report)?;
    let breakdowns_json = serde_json::to_string(&a.breakdowns)?;
    conn.execute(
        "INSERT INTO analysis_result (claim_reference_id, fingerprint_id, fraud_risk_score,
            fraud_risk_level, recommendation, matched_incidents_count,
            report_json, breakdowns_json, analyzed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            a.claim_reference_id,
            a.fingerprint_id,
            a.report.fraud_risk_score,
            a.report.fraud_risk_level.as_str(),
            a.report.recommendation.as_str(),
            a.report.matched_incidents_count as i64,
            report_json,
            breakdowns_json,
            timestamp_to_sql(&a.report.analyzed_at),
        ],
    )
    .map_err(|e| insert_error(e, &a.claim_reference_id))?;
    Ok(())
}

pub(super) fn find_by_claim_ref(
    conn: &Connection,
    claim_ref: &str,
) -> ClaimResult<Option<AnalysisRecord>> {
    Ok(conn
        .query_row(
            "SELECT claim_reference_id, fingerprint_id, report_json, breakdowns_json
             FROM analysis_result WHERE claim_reference_id = ?1",
            params![claim_ref],
            |r| {
                Ok(AnalysisRecord {
                    claim_reference_id: r.get(0)?,
                    fingerprint_id: r.get(1)?,
                    report: json_from_sql(2, &r.get::<_, String>(2)?)?,
                    breakdowns: json_from_sql(3, &r.get::<_, String>(3)?)?,
                })
            },
        )
        .optional()?)
}
