//! Explanation synthesis.
//!
//! RULE: The scoring contract only sees the Narrator trait. The default
//! TemplateNarrator is deterministic; any model-written narrative must
//! plug in here and be stubbed in tests.

use crate::{scoring::RiskLevel, similarity::SimilarityBreakdown};

/// How many triggered factors an explanation quotes.
pub const DOMINANT_FACTORS: usize = 2;

#[derive(Debug, Clone)]
pub struct NarrativeContext<'a> {
    pub risk_level: RiskLevel,
    pub overall_risk_score: f64,
    pub matched_count: usize,
    pub top_match: Option<&'a SimilarityBreakdown>,
    /// Triggered risk factors in rule order.
    pub risk_factors: &'a [String],
}

pub trait Narrator: Send + Sync {
    fn explain(&self, ctx: &NarrativeContext<'_>) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateNarrator;

impl Narrator for TemplateNarrator {
    fn explain(&self, ctx: &NarrativeContext<'_>) -> String {
        let score = percent(ctx.overall_risk_score);
        let mut out = match ctx.risk_level {
            RiskLevel::Low => format!("Claim shows low fraud risk ({score})."),
            RiskLevel::Medium => format!("Claim shows medium fraud risk ({score})."),
            RiskLevel::High => format!("Claim shows high fraud risk ({score})."),
            RiskLevel::Critical => format!("Claim shows CRITICAL fraud risk ({score})."),
        };

        match ctx.top_match {
            Some(top) => out.push_str(&format!(
                " Found {} similar historical incident(s); closest is {} at {} similarity.",
                ctx.matched_count,
                top.matched_claim_reference_id,
                percent(top.blended_score)
            )),
            None => out.push_str(" No similar historical incidents found."),
        }

        let dominant: Vec<&str> = ctx
            .risk_factors
            .iter()
            .take(DOMINANT_FACTORS)
            .map(String::as_str)
            .collect();
        match dominant.len() {
            0 => {}
            1 => out.push_str(&format!(" Key factor: {}.", dominant[0])),
            _ => out.push_str(&format!(" Key factors: {}.", dominant.join("; "))),
        }

        out.push_str(match ctx.risk_level {
            RiskLevel::Low => " Recommend approval with standard processing.",
            RiskLevel::Medium => " Recommend holding the claim for standard verification.",
            RiskLevel::High => " Recommend detailed investigation and verification.",
            RiskLevel::Critical => {
                " Recommend immediate investigation and potential fraud referral."
            }
        });
        out
    }
}

fn percent(score: f64) -> String {
    format!("{}%", (score * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn breakdown(score: f64) -> SimilarityBreakdown {
        SimilarityBreakdown {
            image: 0.9,
            text: 0.8,
            spatial: 1.0,
            temporal: 1.0,
            blended_score: score,
            matched_fingerprint_id: "fp-1".into(),
            matched_claim_reference_id: "CLM-77".into(),
            matched_stored_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn no_history_explanation() {
        let text = TemplateNarrator.explain(&NarrativeContext {
            risk_level: RiskLevel::Low,
            overall_risk_score: 0.1,
            matched_count: 0,
            top_match: None,
            risk_factors: &["no similar historical incidents found".to_string()],
        });
        assert_eq!(
            text,
            "Claim shows low fraud risk (10%). No similar historical incidents found. \
             Key factor: no similar historical incidents found. \
             Recommend approval with standard processing."
        );
    }

    #[test]
    fn critical_explanation_quotes_top_match_and_dominant_factors() {
        let top = breakdown(0.915);
        let factors = vec![
            "high image similarity to an incident 12 days old".to_string(),
            "recurring spatial/temporal pattern".to_string(),
            "third factor".to_string(),
        ];
        let text = TemplateNarrator.explain(&NarrativeContext {
            risk_level: RiskLevel::Critical,
            overall_risk_score: 0.915,
            matched_count: 1,
            top_match: Some(&top),
            risk_factors: &factors,
        });
        assert!(text.starts_with("Claim shows CRITICAL fraud risk (92%)."));
        assert!(text.contains("closest is CLM-77 at 92% similarity"));
        assert!(text.contains(
            "Key factors: high image similarity to an incident 12 days old; recurring spatial/temporal pattern."
        ));
        assert!(!text.contains("third factor"));
    }
}
