//! Fingerprint corpus queries.

use super::{insert_error, timestamp_from_sql, timestamp_to_sql};
use crate::{
    error::ClaimResult,
    fingerprint::{FingerprintCode, FingerprintRecord, IncidentType},
    repository::CandidateFilter,
    types::{FingerprintId, Vector},
};
use rusqlite::{params, types::Value, Connection, OptionalExtension, Row};

const COLUMNS: &str = "fingerprint_id, claim_reference_id, image_embedding, text_embedding,
     spatial_bits, spatial_width, temporal_bits, temporal_width,
     incident_type_code, damage_severity_score, embedding_model_version,
     low_confidence, stored_at";

pub(super) fn insert(conn: &Connection, r: &FingerprintRecord) -> ClaimResult<FingerprintId> {
    conn.execute(
        "INSERT INTO fingerprint (fingerprint_id, claim_reference_id, image_embedding,
            text_embedding, spatial_bits, spatial_width, temporal_bits, temporal_width,
            incident_type_code, damage_severity_score, embedding_model_version,
            low_confidence, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            r.id,
            r.claim_reference_id,
            encode_vector(&r.image_embedding),
            encode_vector(&r.text_embedding),
            r.spatial_fingerprint.bits as i64,
            r.spatial_fingerprint.width as i64,
            r.temporal_fingerprint.bits as i64,
            r.temporal_fingerprint.width as i64,
            r.incident_type_code() as i64,
            r.damage_severity_score,
            r.embedding_model_version,
            r.low_confidence as i32,
            timestamp_to_sql(&r.stored_at),
        ],
    )
    .map_err(|e| insert_error(e, &r.claim_reference_id))?;
    log::debug!("stored fingerprint {} for {}", r.id, r.claim_reference_id);
    Ok(r.id.clone())
}

pub(super) fn find_by_claim_ref(
    conn: &Connection,
    claim_ref: &str,
) -> ClaimResult<Option<FingerprintRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM fingerprint WHERE claim_reference_id = ?1"),
            params![claim_ref],
            row_to_record,
        )
        .optional()?)
}

pub(super) fn fetch_candidates(
    conn: &Connection,
    filter: &CandidateFilter,
) -> ClaimResult<Vec<FingerprintRecord>> {
    let mut sql = format!("SELECT {COLUMNS} FROM fingerprint WHERE 1 = 1");
    let mut args: Vec<Value> = Vec::new();
    if let Some(t) = filter.incident_type {
        args.push(Value::Integer(t.code() as i64));
        sql.push_str(&format!(" AND incident_type_code = ?{}", args.len()));
    }
    if let Some(claim_ref) = &filter.exclude_claim_ref {
        args.push(Value::Text(claim_ref.clone()));
        sql.push_str(&format!(" AND claim_reference_id <> ?{}", args.len()));
    }
    sql.push_str(" ORDER BY stored_at DESC, seq DESC");
    if let Some(limit) = filter.limit {
        args.push(Value::Integer(limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", args.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_record)?;
    let mut result = Vec::new();
    for r in rows {
        result.push(r?);
    }
    log::debug!("fetched {} candidate fingerprints ({filter:?})", result.len());
    Ok(result)
}

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<FingerprintRecord> {
    Ok(FingerprintRecord {
        id: r.get(0)?,
        claim_reference_id: r.get(1)?,
        image_embedding: decode_vector(2, &r.get::<_, Vec<u8>>(2)?)?,
        text_embedding: decode_vector(3, &r.get::<_, Vec<u8>>(3)?)?,
        spatial_fingerprint: FingerprintCode::new(
            r.get::<_, i64>(4)? as u64,
            r.get::<_, i64>(5)? as u8,
        ),
        temporal_fingerprint: FingerprintCode::new(
            r.get::<_, i64>(6)? as u64,
            r.get::<_, i64>(7)? as u8,
        ),
        incident_type: IncidentType::from_code(r.get::<_, i64>(8)? as u8),
        damage_severity_score: r.get(9)?,
        embedding_model_version: r.get(10)?,
        low_confidence: r.get::<_, i32>(11)? != 0,
        stored_at: timestamp_from_sql(12, &r.get::<_, String>(12)?)?,
    })
}

// ── Embedding blobs ───────────────────────────────────────────────
// Little-endian f32, four bytes per dimension.

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(idx: usize, bytes: &[u8]) -> rusqlite::Result<Vector> {
    if bytes.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Blob,
            format!("embedding blob of {} bytes is not a whole number of f32", bytes.len()).into(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
