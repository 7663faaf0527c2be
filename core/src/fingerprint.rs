//! Fingerprint construction from claim metadata.
//!
//! PRIVACY BOUNDARY: nothing finer than the coarse location zone and the
//! bucketed incident time ever reaches a fingerprint. Raw coordinates are
//! rejected, exact timestamps are reduced to day-of-week x 4-hour bucket.

use crate::{
    embedding::stable_hash,
    error::{ClaimError, ClaimResult},
    types::{ClaimRef, FingerprintId, ModelVersion, Vector},
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SPATIAL_CODE_WIDTH: u8 = 32;
pub const TEMPORAL_CODE_WIDTH: u8 = 6;
pub const MAX_CLAIM_REF_LEN: usize = 128;
pub const MAX_ZONE_LEN: usize = 128;

/// Severity bounds applied when the incident type is unknown.
pub const NEUTRAL_SEVERITY_MIN: f64 = 0.25;
pub const NEUTRAL_SEVERITY_MAX: f64 = 0.75;

const HIGH_SEVERITY_KEYWORDS: [&str; 10] = [
    "total loss",
    "critical",
    "severe",
    "major",
    "extensive",
    "destroyed",
    "crushed",
    "fire",
    "explosion",
    "collision",
];

// ── Incident type ─────────────────────────────────────────────────

/// Declared incident type. Codes are persisted: never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Unknown,
    MotorCollision,
    MotorTheft,
    PropertyDamage,
    Fire,
    Flood,
    Storm,
    Theft,
    Vandalism,
}

impl IncidentType {
    /// Parse a caller-supplied label. Unrecognized labels map to Unknown.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "motor_collision" | "motor_damage" | "collision" | "vehicle_damage" => {
                Self::MotorCollision
            }
            "motor_theft" | "vehicle_theft" => Self::MotorTheft,
            "property_damage" | "property" => Self::PropertyDamage,
            "fire" => Self::Fire,
            "flood" | "water_damage" => Self::Flood,
            "storm" | "weather" | "hail" => Self::Storm,
            "theft" | "burglary" => Self::Theft,
            "vandalism" => Self::Vandalism,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::MotorCollision => 1,
            Self::MotorTheft => 2,
            Self::PropertyDamage => 3,
            Self::Fire => 4,
            Self::Flood => 5,
            Self::Storm => 6,
            Self::Theft => 7,
            Self::Vandalism => 8,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::MotorCollision,
            2 => Self::MotorTheft,
            3 => Self::PropertyDamage,
            4 => Self::Fire,
            5 => Self::Flood,
            6 => Self::Storm,
            7 => Self::Theft,
            8 => Self::Vandalism,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::MotorCollision => "motor_collision",
            Self::MotorTheft => "motor_theft",
            Self::PropertyDamage => "property_damage",
            Self::Fire => "fire",
            Self::Flood => "flood",
            Self::Storm => "storm",
            Self::Theft => "theft",
            Self::Vandalism => "vandalism",
        }
    }

    /// Typical severity of this incident type before any claim evidence.
    fn severity_prior(self) -> f64 {
        match self {
            Self::Unknown => 0.5,
            Self::MotorCollision => 0.55,
            Self::MotorTheft => 0.7,
            Self::PropertyDamage => 0.45,
            Self::Fire => 0.85,
            Self::Flood => 0.65,
            Self::Storm => 0.5,
            Self::Theft => 0.6,
            Self::Vandalism => 0.35,
        }
    }
}

// ── Discrete codes ────────────────────────────────────────────────

/// Short fixed-width bit code compared by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintCode {
    pub bits: u64,
    pub width: u8,
}

impl FingerprintCode {
    pub fn new(bits: u64, width: u8) -> Self {
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        Self {
            bits: bits & mask,
            width: width.min(64),
        }
    }

    pub fn hamming_distance(&self, other: &Self) -> u32 {
        (self.bits ^ other.bits).count_ones()
    }

    /// 1.0 for identical codes, falling linearly to 0.0 when every bit
    /// differs. Codes of different width share nothing.
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.width != other.width || self.width == 0 {
            return 0.0;
        }
        1.0 - self.hamming_distance(other) as f64 / self.width as f64
    }
}

impl fmt::Display for FingerprintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = (self.width as usize).div_ceil(4).max(1);
        write!(f, "{:0digits$x}", self.bits)
    }
}

fn gray(n: u64) -> u64 {
    n ^ (n >> 1)
}

// ── Records ───────────────────────────────────────────────────────

/// The unit of comparison. Append-only once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub id: FingerprintId,
    pub claim_reference_id: ClaimRef,
    pub image_embedding: Vector,
    pub text_embedding: Vector,
    pub spatial_fingerprint: FingerprintCode,
    pub temporal_fingerprint: FingerprintCode,
    pub incident_type: IncidentType,
    pub damage_severity_score: f64,
    pub embedding_model_version: ModelVersion,
    /// Set when either embedding is degenerate.
    pub low_confidence: bool,
    pub stored_at: DateTime<Utc>,
}

impl FingerprintRecord {
    pub fn incident_type_code(&self) -> u8 {
        self.incident_type.code()
    }
}

/// Claim metadata the fingerprint is derived from. Already validated for
/// type and range by the caller; structure is re-checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimMetadata {
    pub claim_reference_id: ClaimRef,
    pub incident_type: String,
    pub location_zone: String,
    pub damage_description: String,
    pub incident_date_approx: DateTime<Utc>,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
}

/// Discrete fingerprint fields derived from metadata alone.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFingerprint {
    pub spatial: FingerprintCode,
    pub temporal: FingerprintCode,
    pub incident_type: IncidentType,
    pub damage_severity_score: f64,
}

// ── Builder ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Validate `meta` and derive the spatial, temporal, incident-type and
    /// severity fields. `image_count` is the number of usable images.
    pub fn build(
        &self,
        meta: &ClaimMetadata,
        image_count: usize,
    ) -> ClaimResult<MetadataFingerprint> {
        Self::validate(meta)?;
        let incident_type = IncidentType::parse(&meta.incident_type);
        Ok(MetadataFingerprint {
            spatial: Self::spatial_fingerprint(&meta.location_zone)?,
            temporal: Self::temporal_fingerprint(meta.incident_date_approx),
            incident_type,
            damage_severity_score: Self::severity_score(
                incident_type,
                &meta.damage_description,
                image_count,
            ),
        })
    }

    pub fn validate(meta: &ClaimMetadata) -> ClaimResult<()> {
        let claim_ref = meta.claim_reference_id.trim();
        if claim_ref.is_empty() {
            return Err(ClaimError::validation("claim_reference_id", "must not be empty"));
        }
        if claim_ref.len() > MAX_CLAIM_REF_LEN {
            return Err(ClaimError::validation(
                "claim_reference_id",
                format!("longer than {MAX_CLAIM_REF_LEN} characters"),
            ));
        }
        if meta.incident_type.trim().is_empty() {
            return Err(ClaimError::validation("incident_type", "must not be empty"));
        }
        if meta.time_window_start > meta.time_window_end {
            return Err(ClaimError::validation(
                "time_window",
                format!(
                    "start {} is after end {}",
                    meta.time_window_start, meta.time_window_end
                ),
            ));
        }
        Ok(())
    }

    /// 32-bit code from the normalized zone label.
    pub fn spatial_fingerprint(location_zone: &str) -> ClaimResult<FingerprintCode> {
        let zone = location_zone.trim().to_lowercase();
        if zone.is_empty() {
            return Err(ClaimError::validation("location_zone", "must not be empty"));
        }
        if zone.len() > MAX_ZONE_LEN {
            return Err(ClaimError::validation(
                "location_zone",
                format!("longer than {MAX_ZONE_LEN} characters"),
            ));
        }
        if looks_like_coordinates(&zone) {
            return Err(ClaimError::validation(
                "location_zone",
                "must be a coarse zone, not coordinates",
            ));
        }
        Ok(FingerprintCode::new(
            stable_hash(b"zone", zone.as_bytes()),
            SPATIAL_CODE_WIDTH,
        ))
    }

    /// 6-bit code: Gray(day-of-week) in the low 3 bits, Gray(4-hour bucket)
    /// in the high 3. Adjacent buckets differ by one bit.
    pub fn temporal_fingerprint(when: DateTime<Utc>) -> FingerprintCode {
        let day = when.weekday().num_days_from_monday() as u64;
        let bucket = (when.hour() / 4) as u64;
        FingerprintCode::new(gray(day) | (gray(bucket) << 3), TEMPORAL_CODE_WIDTH)
    }

    /// Bounded severity heuristic. Non-decreasing in keyword hits,
    /// description length and image count.
    pub fn severity_score(
        incident_type: IncidentType,
        description: &str,
        image_count: usize,
    ) -> f64 {
        let text = description.to_lowercase();
        let keyword_hits = HIGH_SEVERITY_KEYWORDS
            .iter()
            .filter(|k| text.contains(*k))
            .count();

        let score = 0.40 * incident_type.severity_prior()
            + 0.30 * (keyword_hits as f64 / 5.0).min(1.0)
            + 0.15 * (description.chars().count() as f64 / 1000.0).min(1.0)
            + 0.15 * (image_count as f64 / 10.0).min(1.0);

        match incident_type {
            IncidentType::Unknown => score.clamp(NEUTRAL_SEVERITY_MIN, NEUTRAL_SEVERITY_MAX),
            _ => score.clamp(0.0, 1.0),
        }
    }
}

/// Decimal places below which a number reads as a coarse label, not a position.
const COORDINATE_MIN_DECIMALS: usize = 3;

/// True for zone labels that carry a latitude/longitude pair: two adjacent
/// tokens, separated by a comma, semicolon, slash or space, each a fine-grained
/// decimal within lat/lon range.
fn looks_like_coordinates(zone: &str) -> bool {
    let tokens: Vec<Option<f64>> = zone
        .split(|c: char| c == ',' || c == ';' || c == '/' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(fine_decimal)
        .collect();
    tokens.windows(2).any(|w| match (w[0], w[1]) {
        (Some(lat), Some(lon)) => lat.abs() <= 90.0 && lon.abs() <= 180.0,
        _ => false,
    })
}

fn fine_decimal(token: &str) -> Option<f64> {
    let (_, fraction) = token.split_once('.')?;
    if fraction.len() < COORDINATE_MIN_DECIMALS || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn meta() -> ClaimMetadata {
        ClaimMetadata {
            claim_reference_id: "CLM-0001".into(),
            incident_type: "motor_damage".into(),
            location_zone: "north_district".into(),
            damage_description: "Rear bumper crushed in collision".into(),
            incident_date_approx: at(2024, 5, 6, 14),
            time_window_start: at(2024, 5, 6, 12),
            time_window_end: at(2024, 5, 6, 16),
        }
    }

    #[test]
    fn incident_type_codes_round_trip() {
        for code in 0..=8u8 {
            assert_eq!(IncidentType::from_code(code).code(), code);
        }
        assert_eq!(IncidentType::parse("Motor Damage"), IncidentType::MotorCollision);
        assert_eq!(IncidentType::parse("meteor strike"), IncidentType::Unknown);
    }

    #[test]
    fn spatial_code_ignores_case_and_padding() {
        let a = FingerprintBuilder::spatial_fingerprint("North_District").unwrap();
        let b = FingerprintBuilder::spatial_fingerprint("  north_district ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.width, SPATIAL_CODE_WIDTH);
        assert!(a.bits <= u32::MAX as u64);
    }

    #[test]
    fn coordinates_never_reach_the_fingerprint() {
        let zones = ["51.5072, -0.1276", "40.7128 -74.0060", "lat 48.856;2.352", "N 1.290/103.851"];
        for zone in zones {
            let err = FingerprintBuilder::spatial_fingerprint(zone).unwrap_err();
            assert!(matches!(err, ClaimError::Validation { field: "location_zone", .. }), "{zone}");
        }
        assert!(FingerprintBuilder::spatial_fingerprint("zone 12").is_ok());
    }

    #[test]
    fn coarse_labels_with_decimals_are_zones() {
        for zone in ["sector 4.5 ring 2.0", "block 12.5, 3.25", "51.5072 harbour -0.1276"] {
            assert!(FingerprintBuilder::spatial_fingerprint(zone).is_ok(), "{zone}");
        }
    }

    #[test]
    fn temporal_code_buckets_time() {
        // 2024-05-06 is a Monday.
        let a = FingerprintBuilder::temporal_fingerprint(at(2024, 5, 6, 13));
        let b = FingerprintBuilder::temporal_fingerprint(at(2024, 5, 6, 15));
        let next_week = FingerprintBuilder::temporal_fingerprint(at(2024, 5, 13, 14));
        assert_eq!(a, b);
        assert_eq!(a, next_week);

        let adjacent_bucket = FingerprintBuilder::temporal_fingerprint(at(2024, 5, 6, 17));
        assert_eq!(a.hamming_distance(&adjacent_bucket), 1);
    }

    #[test]
    fn hamming_similarity_bounds() {
        let a = FingerprintCode::new(0b101010, 6);
        assert_eq!(a.similarity(&a), 1.0);
        assert_eq!(a.similarity(&FingerprintCode::new(0b010101, 6)), 0.0);
        assert_eq!(a.similarity(&FingerprintCode::new(0b101011, 6)), 1.0 - 1.0 / 6.0);
        assert_eq!(a.similarity(&FingerprintCode::new(0b101010, 8)), 0.0);
    }

    #[test]
    fn code_display_is_fixed_width_hex() {
        assert_eq!(FingerprintCode::new(0xAB, 32).to_string(), "000000ab");
        assert_eq!(FingerprintCode::new(0b000101, 6).to_string(), "05");
    }

    #[test]
    fn builder_derives_all_fields() {
        let fp = FingerprintBuilder::new().build(&meta(), 2).unwrap();
        assert_eq!(fp.incident_type, IncidentType::MotorCollision);
        assert_eq!(fp.spatial, FingerprintBuilder::spatial_fingerprint("north_district").unwrap());
        assert!((0.0..=1.0).contains(&fp.damage_severity_score));
    }

    #[test]
    fn inverted_time_window_fails_fast() {
        let mut m = meta();
        m.time_window_start = at(2024, 5, 7, 0);
        let err = FingerprintBuilder::new().build(&m, 0).unwrap_err();
        assert!(matches!(err, ClaimError::Validation { field: "time_window", .. }));
    }

    #[test]
    fn missing_anchor_fields_fail_fast() {
        let mut m = meta();
        m.location_zone = "   ".into();
        assert!(FingerprintBuilder::new().build(&m, 0).is_err());

        let mut m = meta();
        m.claim_reference_id = String::new();
        assert!(FingerprintBuilder::new().build(&m, 0).is_err());
    }

    #[test]
    fn severity_is_monotonic_in_damage_signals() {
        let t = IncidentType::PropertyDamage;
        let plain = FingerprintBuilder::severity_score(t, "window broken", 1);
        let keyword =
            FingerprintBuilder::severity_score(t, "window broken, severe and extensive", 1);
        let more_images = FingerprintBuilder::severity_score(t, "window broken", 6);
        let longer = FingerprintBuilder::severity_score(t, &"window broken ".repeat(40), 1);
        assert!(keyword > plain);
        assert!(more_images > plain);
        assert!(longer > plain);
    }

    #[test]
    fn unknown_type_stays_mid_range() {
        let low = FingerprintBuilder::severity_score(IncidentType::Unknown, "", 0);
        let high = FingerprintBuilder::severity_score(
            IncidentType::Unknown,
            &"total loss critical severe major extensive destroyed ".repeat(30),
            20,
        );
        assert!(low >= NEUTRAL_SEVERITY_MIN && low <= NEUTRAL_SEVERITY_MAX, "{low}");
        assert!(high >= NEUTRAL_SEVERITY_MIN && high <= NEUTRAL_SEVERITY_MAX, "{high}");
        assert!(low > 0.0 && high < 1.0);
    }

    #[test]
    fn severity_is_bounded_for_known_types() {
        let max = FingerprintBuilder::severity_score(
            IncidentType::Fire,
            &"fire explosion destroyed total loss severe ".repeat(50),
            50,
        );
        assert!(max <= 1.0);
        assert!(FingerprintBuilder::severity_score(IncidentType::Vandalism, "", 0) >= 0.0);
    }
}
