//! Fraud risk scoring over similarity results.
//!
//! RULES:
//!   - Scoring is pure: same matches + same query = same outcome.
//!   - Risk level thresholds are fixed constants, not configuration.
//!   - Risk factors come from rules, evaluated in declaration order.
//!   - No matches is a valid low-risk case, never an error.

use crate::{
    config::{RuleThresholds, ScoringConfig},
    fingerprint::FingerprintRecord,
    narrative::{NarrativeContext, Narrator, TemplateNarrator},
    similarity::{MatchSet, SimilarityBreakdown},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MEDIUM_RISK_AT: f64 = 0.3;
pub const HIGH_RISK_AT: f64 = 0.6;
pub const CRITICAL_RISK_AT: f64 = 0.8;

// ── Levels ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// LOW [0, 0.3), MEDIUM [0.3, 0.6), HIGH [0.6, 0.8), CRITICAL [0.8, 1.0].
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_RISK_AT {
            Self::Critical
        } else if score >= HIGH_RISK_AT {
            Self::High
        } else if score >= MEDIUM_RISK_AT {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn recommendation(self) -> Recommendation {
        match self {
            Self::Low => Recommendation::Proceed,
            Self::Medium => Recommendation::Hold,
            Self::High | Self::Critical => Recommendation::Investigate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Proceed,
    Hold,
    Investigate,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "PROCEED",
            Self::Hold => "HOLD",
            Self::Investigate => "INVESTIGATE",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Risk factors ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskFactor {
    HighImageSimilarity { days_old: i64 },
    NarrativeReuse,
    RecurringPattern,
    MultipleMatches { count: usize },
    LowSeverityStrongMatch,
    ElevatedSeverityNoHistory,
    LowConfidenceFingerprint,
    NoHistory,
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighImageSimilarity { days_old: 1 } => {
                write!(f, "high image similarity to an incident 1 day old")
            }
            Self::HighImageSimilarity { days_old } => {
                write!(f, "high image similarity to an incident {days_old} days old")
            }
            Self::NarrativeReuse => {
                write!(f, "near-identical damage narrative to a prior incident")
            }
            Self::RecurringPattern => write!(f, "recurring spatial/temporal pattern"),
            Self::MultipleMatches { count } => {
                write!(f, "multiple ({count}) similar historical incidents")
            }
            Self::LowSeverityStrongMatch => {
                write!(f, "low declared severity despite a strong historical match")
            }
            Self::ElevatedSeverityNoHistory => {
                write!(f, "elevated declared severity with no supporting history")
            }
            Self::LowConfidenceFingerprint => {
                write!(f, "low-confidence fingerprint: image or text evidence is degenerate")
            }
            Self::NoHistory => write!(f, "no similar historical incidents found"),
        }
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone)]
pub struct RuleInput<'a> {
    pub top: Option<&'a SimilarityBreakdown>,
    pub matched_count: usize,
    pub severity: f64,
    pub low_confidence: bool,
    pub as_of: DateTime<Utc>,
    pub thresholds: &'a RuleThresholds,
}

type Rule = fn(&RuleInput<'_>) -> Option<RiskFactor>;

/// Declaration order is output order. Append new rules at the end.
const RULES: [Rule; 8] = [
    image_rule,
    narrative_rule,
    pattern_rule,
    multiple_match_rule,
    low_severity_rule,
    unsupported_severity_rule,
    low_confidence_rule,
    no_history_rule,
];

fn image_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    let top = i.top?;
    (top.image > i.thresholds.image_rule).then(|| RiskFactor::HighImageSimilarity {
        days_old: (i.as_of - top.matched_stored_at).num_days().max(0),
    })
}

fn narrative_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    let top = i.top?;
    (top.text > i.thresholds.text_rule).then_some(RiskFactor::NarrativeReuse)
}

fn pattern_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    let top = i.top?;
    let p = i.thresholds.pattern_rule;
    (top.spatial > p && top.temporal > p).then_some(RiskFactor::RecurringPattern)
}

fn multiple_match_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    (i.matched_count >= i.thresholds.multiple_match_count).then_some(RiskFactor::MultipleMatches {
        count: i.matched_count,
    })
}

fn low_severity_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    (i.matched_count > 0 && i.severity < i.thresholds.low_severity)
        .then_some(RiskFactor::LowSeverityStrongMatch)
}

fn unsupported_severity_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    (i.matched_count == 0 && i.severity >= i.thresholds.high_severity)
        .then_some(RiskFactor::ElevatedSeverityNoHistory)
}

fn low_confidence_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    i.low_confidence.then_some(RiskFactor::LowConfidenceFingerprint)
}

fn no_history_rule(i: &RuleInput<'_>) -> Option<RiskFactor> {
    (i.matched_count == 0).then_some(RiskFactor::NoHistory)
}

/// Evaluate every rule independently; keep all that trigger, in rule
/// order, without duplicates.
pub fn evaluate_rules(input: &RuleInput<'_>) -> Vec<String> {
    let mut factors: Vec<String> = Vec::new();
    for rule in RULES {
        if let Some(factor) = rule(input) {
            let text = factor.to_string();
            if !factors.contains(&text) {
                factors.push(text);
            }
        }
    }
    factors
}

// ── Outcome ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysisOutcome {
    pub overall_risk_score: f64,
    pub risk_level: RiskLevel,
    pub recommendation: Recommendation,
    pub matched_count: usize,
    pub top_match: Option<SimilarityBreakdown>,
    pub risk_factors: Vec<String>,
    pub explanation: String,
    /// Query fingerprint was built from degenerate evidence.
    pub low_confidence: bool,
    /// Candidates excluded for model version or dimension mismatch.
    pub skipped_candidates: usize,
}

// ── Scorer ────────────────────────────────────────────────────────

pub struct FraudScorer {
    config: ScoringConfig,
    narrator: Box<dyn Narrator>,
}

impl FraudScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self::with_narrator(config, Box::new(TemplateNarrator))
    }

    pub fn with_narrator(config: ScoringConfig, narrator: Box<dyn Narrator>) -> Self {
        Self { config, narrator }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Risk score for a given match set: the top match's blended score, or
    /// a severity-derived baseline when nothing matched.
    pub fn risk_score(&self, matches: &MatchSet, severity: f64) -> f64 {
        let score = match (matches.matched_count, matches.top()) {
            (n, Some(top)) if n > 0 => top.blended_score,
            _ => severity * self.config.baseline_severity_factor,
        };
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }

    pub fn score(&self, matches: &MatchSet, query: &FingerprintRecord) -> FraudAnalysisOutcome {
        let overall_risk_score = self.risk_score(matches, query.damage_severity_score);
        let risk_level = RiskLevel::from_score(overall_risk_score);
        let top = if matches.matched_count > 0 { matches.top() } else { None };

        let risk_factors = evaluate_rules(&RuleInput {
            top,
            matched_count: matches.matched_count,
            severity: query.damage_severity_score,
            low_confidence: query.low_confidence,
            as_of: query.stored_at,
            thresholds: &self.config.rules,
        });

        let explanation = self.narrator.explain(&NarrativeContext {
            risk_level,
            overall_risk_score,
            matched_count: matches.matched_count,
            top_match: top,
            risk_factors: &risk_factors,
        });

        log::debug!(
            "scored {}: risk={overall_risk_score:.3} level={risk_level} matches={} factors={}",
            query.claim_reference_id,
            matches.matched_count,
            risk_factors.len()
        );

        FraudAnalysisOutcome {
            overall_risk_score,
            risk_level,
            recommendation: risk_level.recommendation(),
            matched_count: matches.matched_count,
            top_match: top.cloned(),
            risk_factors,
            explanation,
            low_confidence: query.low_confidence,
            skipped_candidates: matches.skipped.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FingerprintCode, IncidentType};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn query(severity: f64) -> FingerprintRecord {
        FingerprintRecord {
            id: "q".into(),
            claim_reference_id: "CLM-Q".into(),
            image_embedding: vec![1.0],
            text_embedding: vec![1.0],
            spatial_fingerprint: FingerprintCode::new(0, 32),
            temporal_fingerprint: FingerprintCode::new(0, 6),
            incident_type: IncidentType::MotorCollision,
            damage_severity_score: severity,
            embedding_model_version: "v".into(),
            low_confidence: false,
            stored_at: now(),
        }
    }

    fn breakdown(image: f64, text: f64, spatial: f64, temporal: f64) -> SimilarityBreakdown {
        SimilarityBreakdown {
            image,
            text,
            spatial,
            temporal,
            blended_score: crate::similarity::CHANNEL_WEIGHTS.blend(image, text, spatial, temporal),
            matched_fingerprint_id: "fp-1".into(),
            matched_claim_reference_id: "CLM-1".into(),
            matched_stored_at: now() - Duration::days(12),
        }
    }

    fn one_match(b: SimilarityBreakdown) -> MatchSet {
        MatchSet {
            matches: vec![b],
            matched_count: 1,
            compared: 1,
            skipped: Vec::new(),
        }
    }

    #[test]
    fn threshold_boundaries() {
        let cases = [
            (0.0, RiskLevel::Low, Recommendation::Proceed),
            (0.29999, RiskLevel::Low, Recommendation::Proceed),
            (0.3, RiskLevel::Medium, Recommendation::Hold),
            (0.59999, RiskLevel::Medium, Recommendation::Hold),
            (0.6, RiskLevel::High, Recommendation::Investigate),
            (0.79999, RiskLevel::High, Recommendation::Investigate),
            (0.8, RiskLevel::Critical, Recommendation::Investigate),
            (1.0, RiskLevel::Critical, Recommendation::Investigate),
        ];
        for (score, level, rec) in cases {
            assert_eq!(RiskLevel::from_score(score), level, "score {score}");
            assert_eq!(RiskLevel::from_score(score).recommendation(), rec, "score {score}");
        }
    }

    #[test]
    fn risk_level_strings_round_trip() {
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical] {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert_eq!(serde_json::to_string(&Recommendation::Hold).unwrap(), "\"HOLD\"");
    }

    #[test]
    fn canonical_critical_scenario() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let outcome = scorer.score(&one_match(breakdown(0.9, 0.8, 1.0, 1.0)), &query(0.5));

        assert_eq!(outcome.overall_risk_score, 0.915);
        assert_eq!(outcome.risk_level, RiskLevel::Critical);
        assert_eq!(outcome.recommendation, Recommendation::Investigate);
        assert_eq!(
            outcome.risk_factors,
            vec![
                "high image similarity to an incident 12 days old".to_string(),
                "recurring spatial/temporal pattern".to_string(),
            ]
        );
        assert!(outcome.top_match.is_some());
    }

    #[test]
    fn no_matches_is_low_baseline() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let outcome = scorer.score(&MatchSet::default(), &query(0.2));

        assert_eq!(outcome.overall_risk_score, 0.2 * 0.25);
        assert_eq!(outcome.risk_level, RiskLevel::Low);
        assert_eq!(outcome.recommendation, Recommendation::Proceed);
        assert_eq!(outcome.matched_count, 0);
        assert!(outcome.top_match.is_none());
        assert_eq!(outcome.risk_factors, vec!["no similar historical incidents found".to_string()]);
    }

    #[test]
    fn elevated_severity_without_history_is_flagged_but_low() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let outcome = scorer.score(&MatchSet::default(), &query(0.95));
        assert_eq!(outcome.risk_level, RiskLevel::Low);
        assert_eq!(
            outcome.risk_factors,
            vec![
                "elevated declared severity with no supporting history".to_string(),
                "no similar historical incidents found".to_string(),
            ]
        );
    }

    #[test]
    fn higher_image_similarity_never_lowers_risk() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let mut previous = 0.0;
        for image in [0.5, 0.6, 0.7, 0.8, 0.9, 1.0] {
            let outcome = scorer.score(&one_match(breakdown(image, 0.6, 0.5, 0.5)), &query(0.5));
            assert!(outcome.overall_risk_score >= previous, "image {image}");
            previous = outcome.overall_risk_score;
        }
    }

    #[test]
    fn rules_fire_independently_in_declaration_order() {
        let thresholds = RuleThresholds::default();
        let top = breakdown(0.95, 0.9, 0.9, 0.9);
        let factors = evaluate_rules(&RuleInput {
            top: Some(&top),
            matched_count: 4,
            severity: 0.1,
            low_confidence: true,
            as_of: now(),
            thresholds: &thresholds,
        });
        assert_eq!(
            factors,
            vec![
                "high image similarity to an incident 12 days old",
                "near-identical damage narrative to a prior incident",
                "recurring spatial/temporal pattern",
                "multiple (4) similar historical incidents",
                "low declared severity despite a strong historical match",
                "low-confidence fingerprint: image or text evidence is degenerate",
            ]
        );
    }

    #[test]
    fn pattern_rule_needs_both_channels() {
        let thresholds = RuleThresholds::default();
        let top = breakdown(0.5, 0.5, 0.9, 0.6);
        let factors = evaluate_rules(&RuleInput {
            top: Some(&top),
            matched_count: 1,
            severity: 0.5,
            low_confidence: false,
            as_of: now(),
            thresholds: &thresholds,
        });
        assert!(factors.is_empty(), "{factors:?}");
    }

    #[test]
    fn same_day_match_reads_zero_days_old() {
        assert_eq!(
            RiskFactor::HighImageSimilarity { days_old: 0 }.to_string(),
            "high image similarity to an incident 0 days old"
        );
        assert_eq!(
            RiskFactor::HighImageSimilarity { days_old: 1 }.to_string(),
            "high image similarity to an incident 1 day old"
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let set = one_match(breakdown(0.85, 0.7, 0.8, 0.75));
        assert_eq!(scorer.score(&set, &query(0.4)), scorer.score(&set, &query(0.4)));
    }

    struct FixedNarrator;

    impl Narrator for FixedNarrator {
        fn explain(&self, ctx: &NarrativeContext<'_>) -> String {
            format!("stub:{}", ctx.risk_level)
        }
    }

    #[test]
    fn narrator_seam_is_pluggable() {
        let scorer = FraudScorer::with_narrator(ScoringConfig::default(), Box::new(FixedNarrator));
        let outcome = scorer.score(&one_match(breakdown(0.9, 0.8, 1.0, 1.0)), &query(0.5));
        assert_eq!(outcome.explanation, "stub:CRITICAL");
    }

    #[test]
    fn skipped_and_low_confidence_are_observable() {
        let scorer = FraudScorer::new(ScoringConfig::default());
        let mut q = query(0.5);
        q.low_confidence = true;
        let set = MatchSet {
            skipped: vec![crate::similarity::SkippedCandidate {
                fingerprint_id: "old".into(),
                reason: "version".into(),
            }],
            ..MatchSet::default()
        };
        let outcome = scorer.score(&set, &q);
        assert!(outcome.low_confidence);
        assert_eq!(outcome.skipped_candidates, 1);
    }
}
